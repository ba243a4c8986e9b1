//! Host link discovery
//!
//! Reads the link table from sysfs. Each directory under the net class
//! root is one link carrying `ifindex` and `operstate`.

use std::fs;
use std::io;
use std::path::Path;

/// Default sysfs root for network links
pub const SYSFS_NET: &str = "/sys/class/net";

/// One host link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetLink {
    pub name: String,
    pub index: u32,
    pub up: bool,
}

/// Scan the host's links
pub fn scan() -> io::Result<Vec<NetLink>> {
    scan_dir(Path::new(SYSFS_NET))
}

/// Scan links under `root`, sorted by index
pub fn scan_dir(root: &Path) -> io::Result<Vec<NetLink>> {
    let mut links = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        let index = match fs::read_to_string(path.join("ifindex")) {
            Ok(raw) => match raw.trim().parse() {
                Ok(index) => index,
                Err(_) => {
                    tracing::debug!(link = %name, "unparsable ifindex");
                    continue;
                }
            },
            Err(_) => continue,
        };

        // "unknown" is what loopback and many tunnels report while running
        let up = fs::read_to_string(path.join("operstate"))
            .map(|state| matches!(state.trim(), "up" | "unknown"))
            .unwrap_or(false);

        links.push(NetLink { name, index, up });
    }
    links.sort_by_key(|link| link.index);
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("smf-link-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn fake_link(root: &Path, name: &str, index: &str, state: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ifindex"), index).unwrap();
        fs::write(dir.join("operstate"), state).unwrap();
    }

    #[test]
    fn test_scan_dir() {
        let root = fake_root("scan");
        fake_link(&root, "wlan0", "3\n", "up\n");
        fake_link(&root, "lo", "1\n", "unknown\n");
        fake_link(&root, "ppp0", "7\n", "down\n");
        fake_link(&root, "bogus", "x\n", "up\n");

        let links = scan_dir(&root).unwrap();
        let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["lo", "wlan0", "ppp0"]);
        assert!(links[0].up);
        assert!(links[1].up);
        assert!(!links[2].up);
        assert_eq!(links[2].index, 7);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_root() {
        assert!(scan_dir(Path::new("/nonexistent/smf/net")).is_err());
    }
}
