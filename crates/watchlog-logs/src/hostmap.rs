use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Friendly names for addresses, read from a file of `ip: name` lines.
///
/// The file is only re-read by [`HostMap::reload_if_stale`] when its
/// modification time changes. Concurrent reloads are harmless; the last
/// writer wins.
#[derive(Debug)]
pub struct HostMap {
    path: PathBuf,
    state: RwLock<Loaded>,
}

#[derive(Debug, Default)]
struct Loaded {
    /// Whether the file has been looked at yet
    checked: bool,
    mtime: Option<SystemTime>,
    names: HashMap<String, String>,
}

impl HostMap {
    /// Create an empty map backed by `path`. Nothing is read until
    /// [`HostMap::reload_if_stale`] is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(Loaded::default()),
        }
    }

    /// Re-read the file if its modification time changed since the last
    /// load. A missing or unreadable file leaves the map empty.
    ///
    /// Returns whether the contents were replaced.
    pub fn reload_if_stale(&self) -> bool {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => Some(mtime),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "cannot stat host map");
                }
                None
            }
        };

        {
            let state = self.state.read();
            if state.checked && state.mtime == mtime {
                return false;
            }
        }

        let names = match mtime {
            Some(_) => match fs::read(&self.path) {
                Ok(bytes) => parse_host_map(&String::from_utf8_lossy(&bytes)),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "cannot read host map");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };
        debug!(path = %self.path.display(), entries = names.len(), "host map loaded");

        *self.state.write() = Loaded {
            checked: true,
            mtime,
            names,
        };
        true
    }

    /// Name mapped to an address
    pub fn name(&self, ip: &str) -> Option<String> {
        self.state.read().names.get(ip).cloned()
    }

    /// `"name (ip)"` for mapped addresses, the address itself otherwise
    pub fn label(&self, ip: &str) -> String {
        match self.name(ip) {
            Some(name) => format!("{} ({})", name, ip),
            None => ip.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse `ip: name` lines, skipping blanks and `#` comments
pub fn parse_host_map(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(ip, name)| (ip.trim().to_string(), name.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    #[test]
    fn test_parse_host_map() {
        let names = parse_host_map(
            "# office\n192.168.1.10: reception-pc\n\n  192.168.1.11 :  nas:backup \nbroken line\n",
        );
        assert_eq!(names.len(), 2);
        assert_eq!(names["192.168.1.10"], "reception-pc");
        assert_eq!(names["192.168.1.11"], "nas:backup");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = HostMap::new(dir.path().join("hosts.yaml"));
        assert!(map.reload_if_stale());
        assert!(!map.reload_if_stale());
        assert!(map.is_empty());
        assert_eq!(map.label("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn test_reload_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yaml");
        fs::write(&path, "192.168.1.10: printer\n").unwrap();

        let map = HostMap::new(&path);
        assert!(map.reload_if_stale());
        assert_eq!(map.label("192.168.1.10"), "printer (192.168.1.10)");

        // Unchanged mtime keeps the cached contents
        assert!(!map.reload_if_stale());

        fs::write(&path, "192.168.1.10: laser-printer\n").unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(map.reload_if_stale());
        assert_eq!(map.name("192.168.1.10").as_deref(), Some("laser-printer"));
    }

    #[test]
    fn test_file_removed_clears_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yaml");
        fs::write(&path, "10.0.0.1: gw\n").unwrap();

        let map = HostMap::new(&path);
        map.reload_if_stale();
        assert_eq!(map.len(), 1);

        fs::remove_file(&path).unwrap();
        assert!(map.reload_if_stale());
        assert!(map.is_empty());
    }
}
