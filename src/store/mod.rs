//! Stockage persistant des services, tentatives, blocages et règles statiques
//!
//! Chaque opération de modification est une transaction : soit elle est
//! entièrement appliquée (en mémoire et sur disque), soit rien ne change.

mod records;

pub use records::RecordStore;

use crate::models::{
    BlockedFilter, BlockedRecord, LoginAttempt, ServiceId, ServiceSettings, StaticRule,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait Store: Send + Sync {
    /// Enregistre un nouveau service et retourne l'identifiant attribué
    fn insert_service(&self, settings: &ServiceSettings) -> Result<ServiceId>;
    fn update_service(&self, settings: &ServiceSettings) -> Result<()>;
    /// Services dans leur ordre d'enregistrement
    fn load_services(&self) -> Result<Vec<ServiceSettings>>;
    /// Supprime le service ainsi que ses tentatives, blocages et règles
    fn delete_service(&self, id: ServiceId) -> Result<()>;

    /// Enregistre en une seule écriture les tentatives d'une passe
    fn record_attempts(&self, attempts: Vec<LoginAttempt>) -> Result<()>;

    fn record_attempt(&self, attempt: LoginAttempt) -> Result<()> {
        self.record_attempts(vec![attempt])
    }
    fn count_attempts_since(
        &self,
        id: ServiceId,
        address: &str,
        since: DateTime<Utc>,
    ) -> Result<usize>;
    /// Supprime les tentatives antérieures à `before`, retourne leur nombre
    fn prune_attempts(&self, id: ServiceId, before: DateTime<Utc>) -> Result<usize>;

    fn active_block(&self, id: ServiceId, address: &str) -> Result<Option<BlockedRecord>>;
    fn insert_block(&self, record: BlockedRecord) -> Result<()>;
    /// Met à jour `blocked_at` du blocage actif
    fn touch_block(&self, id: ServiceId, address: &str, at: DateTime<Utc>) -> Result<()>;
    /// Passe tous les blocages actifs de l'adresse à inactif
    fn deactivate_blocks(&self, id: ServiceId, address: &str) -> Result<usize>;
    /// Adresses dont le blocage actif date de `before` ou avant
    fn expired_blocks(&self, id: ServiceId, before: DateTime<Utc>) -> Result<Vec<String>>;
    /// Blocages triés du plus récent au plus ancien
    fn blocks(
        &self,
        id: ServiceId,
        filter: BlockedFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<BlockedRecord>>;
    fn last_block(&self, id: ServiceId) -> Result<Option<DateTime<Utc>>>;

    fn static_rule(&self, id: ServiceId, address: &str) -> Result<Option<StaticRule>>;
    /// Remplace toute règle existante pour ce couple service/adresse
    fn upsert_static_rule(&self, rule: StaticRule) -> Result<()>;
    fn remove_static_rule(&self, id: ServiceId, address: &str) -> Result<Option<StaticRule>>;
    fn static_rules(&self, id: ServiceId, only_blocked: bool) -> Result<Vec<StaticRule>>;
}
