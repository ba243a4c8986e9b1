//! Statistics display and formatting

use smf::io::RateLimit;
use smf::{AdapterStats, EngineStats};
use std::time::Duration;

const BYTE_UNITS: [(&str, f64); 3] = [
    ("GiB", (1u64 << 30) as f64),
    ("MiB", (1u64 << 20) as f64),
    ("KiB", (1u64 << 10) as f64),
];

const BIT_RATE_UNITS: [(&str, f64); 3] = [
    ("Gbit/s", 1e9),
    ("Mbit/s", 1e6),
    ("kbit/s", 1e3),
];

/// Scale `value` to the largest unit it reaches
fn scaled(value: f64, units: &[(&str, f64)], base: &str) -> String {
    units
        .iter()
        .find(|(_, size)| value >= *size)
        .map(|(unit, size)| format!("{:.1} {}", value / size, unit))
        .unwrap_or_else(|| format!("{} {}", value, base))
}

/// Bytes moved through an adapter or element
pub fn format_volume(bytes: u64) -> String {
    scaled(bytes as f64, &BYTE_UNITS, "B")
}

/// Pacing rate of an adapter, in bits per second
pub fn format_rate(rate: RateLimit) -> String {
    match rate {
        RateLimit::Unlimited => "unlimited".to_string(),
        RateLimit::Suspended => "suspended".to_string(),
        RateLimit::BytesPerSec(bytes) => scaled(bytes * 8.0, &BIT_RATE_UNITS, "bit/s"),
    }
}

/// Daemon uptime as `[Nd ]H:MM:SS`, or `M:SS` under an hour
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours) = (secs / 86_400, (secs % 86_400) / 3600);
    let (minutes, seconds) = ((secs % 3600) / 60, secs % 60);

    match (days, hours) {
        (0, 0) => format!("{}:{:02}", minutes, seconds),
        (0, h) => format!("{}:{:02}:{:02}", h, minutes, seconds),
        (d, h) => format!("{}d {}:{:02}:{:02}", d, h, minutes, seconds),
    }
}

/// Display per-interface statistics
pub fn display_adapter_stats(stats: &[AdapterStats], uptime: Duration) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ FORWARDING STATISTICS  (uptime {:>12})                 │", format_uptime(uptime));
    println!("├──────────┬─────────────┬────────────┬────────┬─────┬───────┤");
    println!("│ Iface    │ Policy      │ Sent       │ Queued │ Drop│ Error │");
    println!("├──────────┼─────────────┼────────────┼────────┼─────┼───────┤");

    for adapter in stats {
        println!(
            "│ {:8} │ {:11} │ {:10} │ {:6} │{:5}│ {:5} │",
            adapter.name,
            adapter.policy.as_str(),
            format_volume(adapter.bytes_sent),
            adapter.queue_len,
            adapter.frames_dropped,
            adapter.send_errors
        );
        for element in &adapter.element_stats {
            println!(
                "│   {:6} │ {:11} │ {:10} │ {:6} │{:5}│ {:5} │",
                element.name,
                "",
                format_volume(element.bytes_sent),
                element.would_block,
                "",
                element.failures
            );
        }
    }

    println!("└──────────┴─────────────┴────────────┴────────┴─────┴───────┘");
}

/// One-line summary of the ingress counters
pub fn format_engine_stats(stats: &EngineStats) -> String {
    format!(
        "Received: {} | Relayed: {} | Duplicates: {} | Expired: {} | Undelivered: {}",
        stats.frames_received, stats.relayed, stats.duplicates, stats.expired, stats.undelivered
    )
}

/// One-line summary of an adapter
pub fn format_compact_stats(stats: &AdapterStats) -> String {
    format!(
        "{} [{} @ {}] sent {} ({}) queued {}/{} dropped {}",
        stats.name,
        stats.policy,
        format_rate(stats.rate),
        stats.frames_sent,
        format_volume(stats.bytes_sent),
        stats.queue_len,
        match stats.queue_depth.as_config() {
            n if n < 0 => "∞".to_string(),
            n => n.to_string(),
        },
        stats.frames_dropped
    )
}
