//! Link-layer frame inspection
//!
//! Minimal Ethernet/IP header access used by the forwarding path: address
//! extraction, control-plane classification for queue priority, and
//! hop-count decrement.

use std::fmt;

/// Ethernet header length
pub const ETHER_HDR_LEN: usize = 14;
/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType for ARP
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// EtherType for IPv6
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
/// UDP port shared by MANET control protocols (OLSR, NHDP)
pub const MANET_PORT: u16 = 698;

const IPPROTO_IGMP: u8 = 2;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ICMPV6: u8 = 58;
const IPV6_HDR_LEN: usize = 40;

/// 48-bit link-layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Broadcast address
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// Group (multicast or broadcast) address
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Result of a hop-count decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopCount {
    /// Decremented; the new value is carried
    Decremented(u8),
    /// Hop count would reach zero; the frame must not be relayed
    Expired,
    /// Not an IP frame
    NotIp,
}

fn mac_at(frame: &[u8], offset: usize) -> Option<MacAddr> {
    let bytes = frame.get(offset..offset + 6)?;
    let mut mac = [0u8; 6];
    mac.copy_from_slice(bytes);
    Some(MacAddr(mac))
}

/// Destination link address
pub fn dst_mac(frame: &[u8]) -> Option<MacAddr> {
    mac_at(frame, 0)
}

/// Source link address
pub fn src_mac(frame: &[u8]) -> Option<MacAddr> {
    mac_at(frame, 6)
}

/// Overwrite the source link address
pub fn set_src_mac(frame: &mut [u8], mac: MacAddr) -> bool {
    match frame.get_mut(6..12) {
        Some(bytes) => {
            bytes.copy_from_slice(&mac.0);
            true
        }
        None => false,
    }
}

/// EtherType of the frame
pub fn ether_type(frame: &[u8]) -> Option<u16> {
    let bytes = frame.get(12..14)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Upper-layer protocol and its offset within the frame
fn transport(frame: &[u8]) -> Option<(u8, usize)> {
    match ether_type(frame)? {
        ETHERTYPE_IPV4 => {
            let ihl = (*frame.get(ETHER_HDR_LEN)? & 0x0f) as usize * 4;
            let proto = *frame.get(ETHER_HDR_LEN + 9)?;
            Some((proto, ETHER_HDR_LEN + ihl))
        }
        ETHERTYPE_IPV6 => {
            let next = *frame.get(ETHER_HDR_LEN + 6)?;
            Some((next, ETHER_HDR_LEN + IPV6_HDR_LEN))
        }
        _ => None,
    }
}

/// IP protocol (IPv4) or next header (IPv6)
pub fn ip_protocol(frame: &[u8]) -> Option<u8> {
    transport(frame).map(|(proto, _)| proto)
}

/// IGMP frame
pub fn is_igmp(frame: &[u8]) -> bool {
    ether_type(frame) == Some(ETHERTYPE_IPV4) && ip_protocol(frame) == Some(IPPROTO_IGMP)
}

/// Control-plane frame that bypasses ordinary queued traffic
///
/// ARP, IGMP, ICMPv6 (neighbor discovery and MLD) and UDP on the MANET
/// protocol port.
pub fn is_control(frame: &[u8]) -> bool {
    if ether_type(frame) == Some(ETHERTYPE_ARP) {
        return true;
    }
    match transport(frame) {
        Some((IPPROTO_IGMP, _)) => ether_type(frame) == Some(ETHERTYPE_IPV4),
        Some((IPPROTO_ICMPV6, _)) => ether_type(frame) == Some(ETHERTYPE_IPV6),
        Some((IPPROTO_UDP, offset)) => match frame.get(offset..offset + 4) {
            Some(ports) => {
                let src = u16::from_be_bytes([ports[0], ports[1]]);
                let dst = u16::from_be_bytes([ports[2], ports[3]]);
                src == MANET_PORT || dst == MANET_PORT
            }
            None => false,
        },
        _ => false,
    }
}

/// Decrement the IPv4 TTL or IPv6 hop limit in place
///
/// The IPv4 header checksum is updated incrementally (RFC 1624).
pub fn decrement_hop_count(frame: &mut [u8]) -> HopCount {
    match ether_type(frame) {
        Some(ETHERTYPE_IPV4) if frame.len() >= ETHER_HDR_LEN + 20 => {
            let ttl_at = ETHER_HDR_LEN + 8;
            let sum_at = ETHER_HDR_LEN + 10;
            let ttl = frame[ttl_at];
            if ttl <= 1 {
                return HopCount::Expired;
            }
            let proto = frame[ttl_at + 1];
            let old = u16::from_be_bytes([ttl, proto]);
            let new = u16::from_be_bytes([ttl - 1, proto]);
            let check = u16::from_be_bytes([frame[sum_at], frame[sum_at + 1]]);

            let mut sum = u32::from(!check) + u32::from(!old) + u32::from(new);
            sum = (sum & 0xffff) + (sum >> 16);
            sum = (sum & 0xffff) + (sum >> 16);
            let check = !(sum as u16);

            frame[ttl_at] = ttl - 1;
            frame[sum_at..sum_at + 2].copy_from_slice(&check.to_be_bytes());
            HopCount::Decremented(ttl - 1)
        }
        Some(ETHERTYPE_IPV6) if frame.len() >= ETHER_HDR_LEN + IPV6_HDR_LEN => {
            let at = ETHER_HDR_LEN + 7;
            let hops = frame[at];
            if hops <= 1 {
                return HopCount::Expired;
            }
            frame[at] = hops - 1;
            HopCount::Decremented(hops - 1)
        }
        _ => HopCount::NotIp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ipv4_checksum(header: &[u8]) -> u16 {
        let mut sum = 0u32;
        for (i, pair) in header.chunks(2).enumerate() {
            if i == 5 {
                continue;
            }
            sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }

    fn ipv4_frame(proto: u8, ttl: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x01, 0x00, 0x5e, 0x00, 0x00, 0x01];
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x0a]);
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        let total = (20 + payload.len()) as u16;
        let mut ip = vec![0x45, 0, 0, 0, 0x12, 0x34, 0, 0, ttl, proto, 0, 0];
        ip[2..4].copy_from_slice(&total.to_be_bytes());
        ip.extend_from_slice(&[10, 0, 0, 1, 224, 0, 0, 1]);
        let check = ipv4_checksum(&ip);
        ip[10..12].copy_from_slice(&check.to_be_bytes());
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_addresses() {
        let mut frame = ipv4_frame(IPPROTO_UDP, 8, &[0; 8]);
        assert!(dst_mac(&frame).unwrap().is_multicast());
        assert_eq!(src_mac(&frame).unwrap().to_string(), "02:00:00:00:00:0a");

        let mac = MacAddr([0x02, 1, 2, 3, 4, 5]);
        assert!(set_src_mac(&mut frame, mac));
        assert_eq!(src_mac(&frame), Some(mac));
        assert!(!MacAddr(mac.0).is_multicast());
        assert!(MacAddr::BROADCAST.is_multicast());
    }

    #[test]
    fn test_truncated_frames() {
        assert!(dst_mac(&[0u8; 4]).is_none());
        assert!(ether_type(&[0u8; 13]).is_none());
        assert!(!is_control(&[0u8; 3]));
        assert_eq!(decrement_hop_count(&mut [0u8; 20]), HopCount::NotIp);
    }

    #[test]
    fn test_control_classification() {
        assert!(is_igmp(&ipv4_frame(IPPROTO_IGMP, 1, &[0x16, 0, 0, 0])));
        assert!(is_control(&ipv4_frame(IPPROTO_IGMP, 1, &[0x16, 0, 0, 0])));

        let olsr = ipv4_frame(IPPROTO_UDP, 1, &[0x02, 0xba, 0x02, 0xba, 0, 8, 0, 0]);
        assert!(is_control(&olsr));

        let data = ipv4_frame(IPPROTO_UDP, 8, &[0x13, 0x88, 0x13, 0x88, 0, 8, 0, 0]);
        assert!(!is_control(&data));
        assert!(!is_igmp(&data));

        let mut arp = vec![0xff; 12];
        arp.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        arp.extend_from_slice(&[0; 28]);
        assert!(is_control(&arp));
    }

    #[test]
    fn test_ipv4_ttl_decrement_keeps_checksum_valid() {
        let mut frame = ipv4_frame(IPPROTO_UDP, 64, &[0; 8]);
        assert_eq!(decrement_hop_count(&mut frame), HopCount::Decremented(63));

        let header = &frame[ETHER_HDR_LEN..ETHER_HDR_LEN + 20];
        let stored = u16::from_be_bytes([header[10], header[11]]);
        assert_eq!(stored, ipv4_checksum(header));
    }

    #[test]
    fn test_expired_ttl_untouched() {
        let mut frame = ipv4_frame(IPPROTO_UDP, 1, &[0; 8]);
        let before = frame.clone();
        assert_eq!(decrement_hop_count(&mut frame), HopCount::Expired);
        assert_eq!(frame, before);
    }

    #[test]
    fn test_ipv6_hop_limit() {
        let mut frame = vec![0x33, 0x33, 0, 0, 0, 1, 0x02, 0, 0, 0, 0, 1];
        frame.extend_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
        let mut ip = vec![0u8; 40];
        ip[0] = 0x60;
        ip[6] = IPPROTO_ICMPV6;
        ip[7] = 255;
        frame.extend_from_slice(&ip);

        assert!(is_control(&frame));
        assert_eq!(ip_protocol(&frame), Some(IPPROTO_ICMPV6));
        assert_eq!(decrement_hop_count(&mut frame), HopCount::Decremented(254));
    }

    proptest! {
        #[test]
        fn prop_incremental_checksum_matches(ttl in 2u8..=255, proto in any::<u8>(), id in any::<u16>()) {
            let mut frame = ipv4_frame(proto, ttl, &[0; 8]);
            frame[18..20].copy_from_slice(&id.to_be_bytes());
            let header = ETHER_HDR_LEN..ETHER_HDR_LEN + 20;
            let check = ipv4_checksum(&frame[header.clone()]);
            frame[ETHER_HDR_LEN + 10..ETHER_HDR_LEN + 12].copy_from_slice(&check.to_be_bytes());

            prop_assert_eq!(decrement_hop_count(&mut frame), HopCount::Decremented(ttl - 1));
            let stored = u16::from_be_bytes([frame[ETHER_HDR_LEN + 10], frame[ETHER_HDR_LEN + 11]]);
            prop_assert_eq!(stored, ipv4_checksum(&frame[header]));
        }
    }
}
