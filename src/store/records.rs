use super::Store;
use crate::files::{read_if_exists, write_atomically};
use crate::models::{
    BlockedFilter, BlockedRecord, LoginAttempt, ServiceId, ServiceSettings, StaticRule,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    next_service_id: ServiceId,
    services: Vec<ServiceSettings>,
    attempts: Vec<LoginAttempt>,
    blocks: Vec<BlockedRecord>,
    rules: Vec<StaticRule>,
}

/// Empreinte du fichier au dernier chargement ou à la dernière écriture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok()?,
            len: metadata.len(),
        })
    }
}

struct Snapshot {
    tables: Tables,
    stamp: Option<FileStamp>,
}

/// Stockage en mémoire, éventuellement adossé à un fichier JSON
///
/// Un autre processus (`zshield add` pendant que le démon tourne) peut
/// réécrire le fichier : toute lecture ou écriture recharge d'abord le
/// fichier si son empreinte a changé.
pub struct RecordStore {
    snapshot: Mutex<Snapshot>,
    path: Option<PathBuf>,
}

fn load_tables(path: &Path) -> Result<Option<Tables>> {
    match read_if_exists(path).with_context(|| format!("Impossible de lire {}", path.display()))? {
        Some(content) if !content.trim().is_empty() => {
            let tables = serde_json::from_str(&content)
                .with_context(|| format!("Stockage corrompu dans {}", path.display()))?;
            Ok(Some(tables))
        }
        _ => Ok(None),
    }
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self {
            snapshot: Mutex::new(Snapshot {
                tables: Tables::default(),
                stamp: None,
            }),
            path: None,
        }
    }

    /// Ouvre le fichier de stockage, vide s'il n'existe pas encore
    pub fn open(path: &Path) -> Result<Self> {
        let tables = match load_tables(path)? {
            Some(tables) => tables,
            None => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Impossible de créer {}", parent.display()))?;
                }
                Tables::default()
            }
        };

        Ok(Self {
            snapshot: Mutex::new(Snapshot {
                tables,
                stamp: FileStamp::of(path),
            }),
            path: Some(path.to_path_buf()),
        })
    }

    /// Verrouille l'instantané, rechargé si le fichier a changé entre-temps
    fn lock(&self) -> Result<MutexGuard<'_, Snapshot>> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|e| anyhow!("Stockage inaccessible (verrou empoisonné): {}", e))?;

        if let Some(path) = &self.path {
            let stamp = FileStamp::of(path);
            if stamp.is_some() && stamp != guard.stamp {
                if let Some(tables) = load_tables(path)? {
                    guard.tables = tables;
                    debug!("Stockage rechargé depuis {}", path.display());
                }
                guard.stamp = stamp;
            }
        }
        Ok(guard)
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let guard = self.lock()?;
        Ok(f(&guard.tables))
    }

    /// Applique `f` sur une copie, l'écrit sur disque puis la rend visible
    fn transact<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let mut next = guard.tables.clone();
        let out = f(&mut next)?;
        if next == guard.tables {
            return Ok(out);
        }

        if let Some(path) = &self.path {
            let content = serde_json::to_vec(&next)?;
            write_atomically(path, &content)
                .with_context(|| format!("Impossible d'écrire {}", path.display()))?;
            guard.stamp = FileStamp::of(path);
            debug!("Stockage écrit dans {}", path.display());
        }
        guard.tables = next;
        Ok(out)
    }
}

impl Tables {
    fn active_mut(&mut self, id: ServiceId, address: &str) -> Option<&mut BlockedRecord> {
        self.blocks
            .iter_mut()
            .find(|b| b.service_id == id && b.address == address && b.active)
    }
}

impl Store for RecordStore {
    fn insert_service(&self, settings: &ServiceSettings) -> Result<ServiceId> {
        self.transact(|tables| {
            let highest = tables.services.iter().map(|s| s.id).max().unwrap_or(0);
            let id = tables.next_service_id.max(highest) + 1;
            tables.next_service_id = id;

            let mut record = settings.clone();
            record.id = id;
            tables.services.push(record);
            Ok(id)
        })
    }

    fn update_service(&self, settings: &ServiceSettings) -> Result<()> {
        self.transact(|tables| {
            match tables.services.iter_mut().find(|s| s.id == settings.id) {
                Some(record) => *record = settings.clone(),
                None => bail!("Service {} absent du stockage", settings.id),
            }
            Ok(())
        })
    }

    fn load_services(&self) -> Result<Vec<ServiceSettings>> {
        self.read(|tables| tables.services.clone())
    }

    fn delete_service(&self, id: ServiceId) -> Result<()> {
        self.transact(|tables| {
            tables.services.retain(|s| s.id != id);
            tables.attempts.retain(|a| a.service_id != id);
            tables.blocks.retain(|b| b.service_id != id);
            tables.rules.retain(|r| r.service_id != id);
            Ok(())
        })
    }

    fn record_attempts(&self, attempts: Vec<LoginAttempt>) -> Result<()> {
        self.transact(|tables| {
            tables.attempts.extend(attempts);
            Ok(())
        })
    }

    fn count_attempts_since(
        &self,
        id: ServiceId,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        self.read(|tables| {
            tables
                .attempts
                .iter()
                .filter(|a| a.service_id == id && a.address == address && a.timestamp >= since)
                .count()
        })
    }

    fn prune_attempts(&self, id: ServiceId, before: DateTime<Utc>) -> Result<usize> {
        self.transact(|tables| {
            let initial = tables.attempts.len();
            tables
                .attempts
                .retain(|a| a.service_id != id || a.timestamp >= before);
            Ok(initial - tables.attempts.len())
        })
    }

    fn active_block(&self, id: ServiceId, address: &str) -> Result<Option<BlockedRecord>> {
        self.read(|tables| {
            tables
                .blocks
                .iter()
                .find(|b| b.service_id == id && b.address == address && b.active)
                .cloned()
        })
    }

    fn insert_block(&self, record: BlockedRecord) -> Result<()> {
        self.transact(|tables| {
            if record.active {
                if let Some(existing) = tables.active_mut(record.service_id, &record.address) {
                    existing.blocked_at = record.blocked_at;
                    return Ok(());
                }
            }
            tables.blocks.push(record);
            Ok(())
        })
    }

    fn touch_block(&self, id: ServiceId, address: &str, at: DateTime<Utc>) -> Result<()> {
        self.transact(|tables| {
            match tables.active_mut(id, address) {
                Some(record) => record.blocked_at = at,
                None => bail!("Aucun blocage actif pour {} (service {})", address, id),
            }
            Ok(())
        })
    }

    fn deactivate_blocks(&self, id: ServiceId, address: &str) -> Result<usize> {
        self.transact(|tables| {
            let mut count = 0;
            for record in tables
                .blocks
                .iter_mut()
                .filter(|b| b.service_id == id && b.address == address && b.active)
            {
                record.active = false;
                count += 1;
            }
            Ok(count)
        })
    }

    fn expired_blocks(&self, id: ServiceId, before: DateTime<Utc>) -> Result<Vec<String>> {
        self.read(|tables| {
            tables
                .blocks
                .iter()
                .filter(|b| b.service_id == id && b.active && b.blocked_at <= before)
                .map(|b| b.address.clone())
                .collect()
        })
    }

    fn blocks(
        &self,
        id: ServiceId,
        filter: BlockedFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockedRecord>> {
        let since = now - Duration::hours(24);
        let mut records = self.read(|tables| {
            tables
                .blocks
                .iter()
                .filter(|b| b.service_id == id)
                .filter(|b| match filter {
                    BlockedFilter::Current => b.active,
                    BlockedFilter::Last24h => b.blocked_at >= since,
                    BlockedFilter::Historic => true,
                })
                .cloned()
                .collect::<Vec<_>>()
        })?;
        records.sort_by(|a, b| b.blocked_at.cmp(&a.blocked_at));
        Ok(records)
    }

    fn last_block(&self, id: ServiceId) -> Result<Option<DateTime<Utc>>> {
        self.read(|tables| {
            tables
                .blocks
                .iter()
                .filter(|b| b.service_id == id)
                .map(|b| b.blocked_at)
                .max()
        })
    }

    fn static_rule(&self, id: ServiceId, address: &str) -> Result<Option<StaticRule>> {
        self.read(|tables| {
            tables
                .rules
                .iter()
                .find(|r| r.service_id == id && r.address == address)
                .cloned()
        })
    }

    fn upsert_static_rule(&self, rule: StaticRule) -> Result<()> {
        self.transact(|tables| {
            tables
                .rules
                .retain(|r| !(r.service_id == rule.service_id && r.address == rule.address));
            tables.rules.push(rule);
            Ok(())
        })
    }

    fn remove_static_rule(&self, id: ServiceId, address: &str) -> Result<Option<StaticRule>> {
        self.transact(|tables| {
            let position = tables
                .rules
                .iter()
                .position(|r| r.service_id == id && r.address == address);
            Ok(position.map(|index| tables.rules.remove(index)))
        })
    }

    fn static_rules(&self, id: ServiceId, only_blocked: bool) -> Result<Vec<StaticRule>> {
        self.read(|tables| {
            tables
                .rules
                .iter()
                .filter(|r| r.service_id == id && (!only_blocked || r.blocked))
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceKind;

    fn settings(name: &str) -> ServiceSettings {
        ServiceSettings {
            id: 0,
            name: name.to_string(),
            kind: ServiceKind::Ssh,
            time_threshold: 5,
            max_attempts: 3,
            block_duration: Some(10),
            log_path: "/var/log/auth.log".to_string(),
            lock_resource: Some("sshd".to_string()),
            stopped: false,
        }
    }

    fn block(id: ServiceId, address: &str, at: DateTime<Utc>) -> BlockedRecord {
        BlockedRecord {
            service_id: id,
            address: address.to_string(),
            blocked_at: at,
            active: true,
        }
    }

    #[test]
    fn test_ids_are_never_reused() {
        let store = RecordStore::in_memory();
        let a = store.insert_service(&settings("a")).unwrap();
        let b = store.insert_service(&settings("b")).unwrap();
        store.delete_service(b).unwrap();
        let c = store.insert_service(&settings("c")).unwrap();

        assert_eq!((a, b, c), (1, 2, 3));
        let names: Vec<String> = store.load_services().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_update_unknown_service_fails() {
        let store = RecordStore::in_memory();
        let mut s = settings("a");
        s.id = 42;
        assert!(store.update_service(&s).is_err());
    }

    #[test]
    fn test_delete_cascades() {
        let store = RecordStore::in_memory();
        let id = store.insert_service(&settings("a")).unwrap();
        let other = store.insert_service(&settings("b")).unwrap();
        let now = Utc::now();

        for service in [id, other] {
            store
                .record_attempt(LoginAttempt {
                    service_id: service,
                    address: "10.0.0.1".to_string(),
                    timestamp: now,
                })
                .unwrap();
            store.insert_block(block(service, "10.0.0.1", now)).unwrap();
            store
                .upsert_static_rule(StaticRule {
                    service_id: service,
                    address: "10.0.0.2".to_string(),
                    added_at: now,
                    blocked: true,
                })
                .unwrap();
        }

        store.delete_service(id).unwrap();
        assert_eq!(store.count_attempts_since(id, "10.0.0.1", now).unwrap(), 0);
        assert!(store.active_block(id, "10.0.0.1").unwrap().is_none());
        assert!(store.static_rules(id, false).unwrap().is_empty());

        assert_eq!(store.count_attempts_since(other, "10.0.0.1", now).unwrap(), 1);
        assert!(store.active_block(other, "10.0.0.1").unwrap().is_some());
    }

    #[test]
    fn test_single_active_block_per_address() {
        let store = RecordStore::in_memory();
        let now = Utc::now();
        store.insert_block(block(1, "10.0.0.1", now)).unwrap();
        store
            .insert_block(block(1, "10.0.0.1", now + Duration::minutes(1)))
            .unwrap();

        let current = store.blocks(1, BlockedFilter::Current, now).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].blocked_at, now + Duration::minutes(1));

        assert_eq!(store.deactivate_blocks(1, "10.0.0.1").unwrap(), 1);
        store
            .insert_block(block(1, "10.0.0.1", now + Duration::minutes(2)))
            .unwrap();
        assert_eq!(store.blocks(1, BlockedFilter::Current, now).unwrap().len(), 1);
        assert_eq!(store.blocks(1, BlockedFilter::Historic, now).unwrap().len(), 2);
    }

    #[test]
    fn test_block_listing_filters_and_order() {
        let store = RecordStore::in_memory();
        let now = Utc::now();
        store.insert_block(block(1, "10.0.0.1", now - Duration::hours(30))).unwrap();
        store.insert_block(block(1, "10.0.0.2", now - Duration::hours(2))).unwrap();
        store.insert_block(block(1, "10.0.0.3", now - Duration::hours(1))).unwrap();
        store.deactivate_blocks(1, "10.0.0.3").unwrap();

        let last_day: Vec<String> = store
            .blocks(1, BlockedFilter::Last24h, now)
            .unwrap()
            .into_iter()
            .map(|b| b.address)
            .collect();
        assert_eq!(last_day, vec!["10.0.0.3", "10.0.0.2"]);

        let current = store.blocks(1, BlockedFilter::Current, now).unwrap();
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].address, "10.0.0.2");

        assert_eq!(store.last_block(1).unwrap(), Some(now - Duration::hours(1)));
        assert_eq!(
            store.expired_blocks(1, now - Duration::hours(2)).unwrap(),
            vec!["10.0.0.1", "10.0.0.2"]
        );
    }

    #[test]
    fn test_prune_attempts() {
        let store = RecordStore::in_memory();
        let now = Utc::now();
        for minutes in [0, 3, 10] {
            store
                .record_attempt(LoginAttempt {
                    service_id: 1,
                    address: "10.0.0.1".to_string(),
                    timestamp: now - Duration::minutes(minutes),
                })
                .unwrap();
        }

        assert_eq!(store.prune_attempts(1, now - Duration::minutes(5)).unwrap(), 1);
        assert_eq!(
            store
                .count_attempts_since(1, "10.0.0.1", now - Duration::hours(1))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_static_rule_upsert_replaces() {
        let store = RecordStore::in_memory();
        let now = Utc::now();
        let mut rule = StaticRule {
            service_id: 1,
            address: "10.0.0.1".to_string(),
            added_at: now,
            blocked: true,
        };
        store.upsert_static_rule(rule.clone()).unwrap();
        rule.blocked = false;
        store.upsert_static_rule(rule.clone()).unwrap();

        assert_eq!(store.static_rules(1, false).unwrap(), vec![rule.clone()]);
        assert!(store.static_rules(1, true).unwrap().is_empty());
        assert_eq!(store.remove_static_rule(1, "10.0.0.1").unwrap(), Some(rule));
        assert_eq!(store.remove_static_rule(1, "10.0.0.1").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/store.json");
        let now = Utc::now();

        {
            let store = RecordStore::open(&path).unwrap();
            let id = store.insert_service(&settings("ssh")).unwrap();
            store.insert_block(block(id, "10.0.0.1", now)).unwrap();
        }

        let store = RecordStore::open(&path).unwrap();
        let services = store.load_services().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, 1);
        assert!(store.active_block(1, "10.0.0.1").unwrap().is_some());
        assert_eq!(store.insert_service(&settings("web")).unwrap(), 2);
    }

    #[test]
    fn test_writes_from_another_process_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let daemon = RecordStore::open(&path).unwrap();
        daemon.insert_service(&settings("admin")).unwrap();

        let cli = RecordStore::open(&path).unwrap();
        assert_eq!(cli.insert_service(&settings("ssh")).unwrap(), 2);

        daemon
            .record_attempt(LoginAttempt {
                service_id: 1,
                address: "10.0.0.1".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();

        let names = |store: &RecordStore| -> Vec<String> {
            store.load_services().unwrap().into_iter().map(|s| s.name).collect()
        };
        assert_eq!(names(&daemon), vec!["admin", "ssh"]);
        assert_eq!(names(&RecordStore::open(&path).unwrap()), vec!["admin", "ssh"]);
        assert_eq!(daemon.insert_service(&settings("web")).unwrap(), 3);
    }

    #[test]
    fn test_attempt_batch_is_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = RecordStore::open(&path).unwrap();

        store.record_attempts(Vec::new()).unwrap();
        assert!(!path.exists());

        let now = Utc::now();
        let batch = ["10.0.0.1", "10.0.0.1", "10.0.0.2"]
            .iter()
            .map(|address| LoginAttempt {
                service_id: 1,
                address: address.to_string(),
                timestamp: now,
            })
            .collect();
        store.record_attempts(batch).unwrap();

        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.count_attempts_since(1, "10.0.0.1", now).unwrap(), 2);
        assert_eq!(reopened.count_attempts_since(1, "10.0.0.2", now).unwrap(), 1);
    }

    #[test]
    fn test_corrupted_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ pas du json").unwrap();
        assert!(RecordStore::open(&path).is_err());
    }
}
