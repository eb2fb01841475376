//! Verrou par démon via `/etc/hosts.deny` (TCP wrappers)
//!
//! Une ligne par démon : `sshd : 10.0.0.1, 10.0.0.2`. Les lignes de
//! commentaire et celles des autres démons ne sont jamais modifiées.

use super::ServiceLock;
use crate::files::{read_if_exists, write_atomically};
use crate::validation::normalize;
use log::error;
use std::io;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

pub struct DaemonAccessLock {
    daemon: String,
    path: PathBuf,
}

/// Adresse telle qu'elle doit apparaître dans hosts.deny
fn entry(address: &str) -> String {
    let address = normalize(address);
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]", address)
    } else {
        address
    }
}

/// Adresse d'une entrée, crochets IPv6 retirés
fn bare(entry: &str) -> String {
    normalize(entry.trim().trim_start_matches('[').trim_end_matches(']'))
}

/// Découpe `démon : a, b` si la ligne concerne `daemon`
fn parse_line<'a>(line: &'a str, daemon: &str) -> Option<Vec<&'a str>> {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return None;
    }
    let (name, list) = trimmed.split_once(':')?;
    if name.trim() != daemon {
        return None;
    }
    Some(
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

fn render(daemon: &str, entries: &[String]) -> String {
    format!("{} : {}", daemon, entries.join(", "))
}

impl DaemonAccessLock {
    pub fn new(daemon: &str, path: &Path) -> Self {
        Self {
            daemon: daemon.trim().to_string(),
            path: path.to_path_buf(),
        }
    }

    pub fn daemon(&self) -> &str {
        &self.daemon
    }

    /// Réécrit le fichier en appliquant `edit` à la liste du démon
    fn rewrite<F>(&self, edit: F) -> io::Result<()>
    where
        F: Fn(&mut Vec<String>),
    {
        let content = read_if_exists(&self.path)?.unwrap_or_default();
        let mut lines: Vec<String> = Vec::new();
        let mut found = false;

        for line in content.lines() {
            match parse_line(line, &self.daemon) {
                Some(items) => {
                    let mut entries: Vec<String> = items.into_iter().map(String::from).collect();
                    edit(&mut entries);
                    found = true;
                    if !entries.is_empty() {
                        lines.push(render(&self.daemon, &entries));
                    }
                }
                None => lines.push(line.to_string()),
            }
        }

        if !found {
            let mut entries = Vec::new();
            edit(&mut entries);
            if !entries.is_empty() {
                lines.push(render(&self.daemon, &entries));
            }
        }

        let mut out = lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        if out == content {
            return Ok(());
        }
        write_atomically(&self.path, out.as_bytes())
    }

    fn try_block(&self, addresses: &[String]) -> io::Result<()> {
        self.rewrite(|entries| {
            for address in addresses {
                let present = entries.iter().any(|e| bare(e) == normalize(address));
                if !present {
                    entries.push(entry(address));
                }
            }
        })
    }

    fn try_unblock(&self, addresses: &[String]) -> io::Result<()> {
        let targets: Vec<String> = addresses.iter().map(|a| normalize(a)).collect();
        self.rewrite(|entries| entries.retain(|e| !targets.contains(&bare(e))))
    }
}

impl ServiceLock for DaemonAccessLock {
    fn block(&self, addresses: &[String]) -> bool {
        match self.try_block(addresses) {
            Ok(()) => true,
            Err(e) => {
                error!("Impossible de modifier {}: {}", self.path.display(), e);
                false
            }
        }
    }

    fn unblock(&self, addresses: &[String]) -> bool {
        match self.try_unblock(addresses) {
            Ok(()) => true,
            Err(e) => {
                error!("Impossible de modifier {}: {}", self.path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_block_creates_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.deny");
        let lock = DaemonAccessLock::new("sshd", &path);

        assert!(lock.block(&addrs(&["10.0.0.1", "10.0.0.2", "10.0.0.1"])));
        assert_eq!(fs::read_to_string(&path).unwrap(), "sshd : 10.0.0.1, 10.0.0.2\n");
    }

    #[test]
    fn test_block_appends_to_existing_line_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.deny");
        fs::write(
            &path,
            "# sshd : 9.9.9.9\nvsftpd : 10.0.0.1\nsshd-extra : 8.8.8.8\nsshd : 10.0.0.1\n",
        )
        .unwrap();
        let lock = DaemonAccessLock::new("sshd", &path);

        assert!(lock.block(&addrs(&["10.0.0.3"])));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# sshd : 9.9.9.9\nvsftpd : 10.0.0.1\nsshd-extra : 8.8.8.8\nsshd : 10.0.0.1, 10.0.0.3\n"
        );
    }

    #[test]
    fn test_unblock_last_address_removes_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.deny");
        fs::write(&path, "vsftpd : 10.0.0.1\nsshd : 10.0.0.1\n").unwrap();
        let lock = DaemonAccessLock::new("sshd", &path);

        assert!(lock.unblock(&addrs(&["10.0.0.1"])));
        assert_eq!(fs::read_to_string(&path).unwrap(), "vsftpd : 10.0.0.1\n");
    }

    #[test]
    fn test_unblock_keeps_remaining_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.deny");
        fs::write(&path, "sshd : 10.0.0.1, 10.0.0.11, 10.0.0.2\n").unwrap();
        let lock = DaemonAccessLock::new("sshd", &path);

        assert!(lock.unblock(&addrs(&["10.0.0.1"])));
        assert_eq!(fs::read_to_string(&path).unwrap(), "sshd : 10.0.0.11, 10.0.0.2\n");
    }

    #[test]
    fn test_ipv6_entries_are_bracketed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.deny");
        let lock = DaemonAccessLock::new("sshd", &path);

        assert!(lock.block(&addrs(&["2001:DB8::1"])));
        assert_eq!(fs::read_to_string(&path).unwrap(), "sshd : [2001:db8::1]\n");

        assert!(lock.unblock(&addrs(&["2001:db8::1"])));
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_unblock_missing_file_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.deny");
        let lock = DaemonAccessLock::new("sshd", &path);

        assert!(lock.unblock(&addrs(&["10.0.0.1"])));
        assert!(!path.exists());
    }
}
