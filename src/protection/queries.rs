//! Consultation de l'état d'un service pour l'interface d'administration

use super::ProtectedService;
use crate::error::Result;
use crate::models::{format_elapsed, BlockedEntry, BlockedFilter, ServiceInfo, StaticRule};
use chrono::{DateTime, Utc};

impl ProtectedService {
    /// Adresses bloquées, les plus récentes d'abord, suivies des adresses
    /// en liste noire
    pub fn get_blocked_addresses(
        &self,
        filter: BlockedFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockedEntry>> {
        let mut entries: Vec<BlockedEntry> = self
            .store()
            .blocks(self.settings.id, filter, now)?
            .into_iter()
            .map(|record| BlockedEntry {
                address: record.address,
                blocked_at: Some(record.blocked_at),
                active: record.active,
                blacklisted: false,
            })
            .collect();

        entries.extend(
            self.get_static_rules(true)?
                .into_iter()
                .map(|rule| BlockedEntry {
                    address: rule.address,
                    blocked_at: None,
                    active: true,
                    blacklisted: true,
                }),
        );
        Ok(entries)
    }

    pub fn get_static_rules(&self, only_blocked: bool) -> Result<Vec<StaticRule>> {
        Ok(self.store().static_rules(self.settings.id, only_blocked)?)
    }

    /// Temps écoulé depuis le dernier blocage, `None` si aucun
    pub fn last_blocked(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        Ok(self
            .store()
            .last_block(self.settings.id)?
            .map(|at| format_elapsed(at, now)))
    }

    pub fn get_info(&self, now: DateTime<Utc>) -> Result<ServiceInfo> {
        let s = &self.settings;
        Ok(ServiceInfo {
            id: s.id,
            name: s.name.clone(),
            kind: s.kind,
            time_threshold: s.time_threshold,
            max_attempts: s.max_attempts,
            block_duration: s.block_duration,
            log_path: s.log_path.clone(),
            lock_resource: s.lock_resource.clone(),
            stopped: s.stopped,
            state: self.state(),
            error: self.last_error.clone(),
            blocked_now: self.get_blocked_addresses(BlockedFilter::Current, now)?.len(),
            blocked_24h: self.get_blocked_addresses(BlockedFilter::Last24h, now)?.len(),
            last_blocked: self.last_blocked(now)?,
        })
    }
}
