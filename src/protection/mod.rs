//! Module de protection d'un service
//!
//! Un [`ProtectedService`] possède les paramètres d'un service, son traqueur
//! de journal et son verrou. Le planificateur appelle [`ProtectedService::iteration`]
//! à chaque passe ; l'interface d'administration passe par les opérations de
//! `policy.rs` (blocages, règles statiques) et `queries.rs` (état, listes).

mod policy;
mod queries;

use crate::error::{Error, Result};
use crate::locks::{EnforcementLock, LockOptions};
use crate::logger::EventLogger;
use crate::models::{ServiceId, ServiceSettings, ServiceState};
use crate::store::Store;
use crate::tracker::{patterns, LogSniffer, LoginTracker};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Dépendances partagées par tous les services
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn Store>,
    pub events: Arc<EventLogger>,
    pub locks: LockOptions,
}

pub struct ProtectedService {
    pub(crate) settings: ServiceSettings,
    pub(crate) context: ServiceContext,
    /// Paramètres modifiés, à écrire lors de la prochaine passe
    pub(crate) pending_write: bool,
    pub(crate) tracker: Option<Box<dyn LoginTracker>>,
    pub(crate) lock: Option<EnforcementLock>,
    pub(crate) initialized: bool,
    /// Dernière erreur de configuration
    pub(crate) last_error: Option<String>,
}

impl ProtectedService {
    /// Les paramètres doivent déjà porter l'identifiant attribué par le stockage
    pub fn new(settings: ServiceSettings, context: ServiceContext) -> Self {
        Self {
            settings,
            context,
            pending_write: false,
            tracker: None,
            lock: None,
            initialized: false,
            last_error: None,
        }
    }

    pub fn id(&self) -> ServiceId {
        self.settings.id
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending_write
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.context.store.as_ref()
    }

    pub fn state(&self) -> ServiceState {
        if self.settings.stopped && self.last_error.is_some() {
            ServiceState::Error
        } else if self.settings.stopped {
            ServiceState::Stopped
        } else if self.initialized {
            ServiceState::Active
        } else {
            ServiceState::Uninitialized
        }
    }

    fn build_components(
        &self,
    ) -> std::result::Result<(Box<dyn LoginTracker>, Option<EnforcementLock>), String> {
        let patterns = patterns::for_kind(self.settings.kind)
            .ok_or_else(|| format!("type de service non supporté: {}", self.settings.kind))?;
        let tracker = LogSniffer::new(&self.settings.log_path, patterns)
            .map_err(|e| format!("journal {} illisible: {}", self.settings.log_path, e))?;
        let lock = EnforcementLock::for_settings(&self.settings, &self.context.locks)?;
        Ok((Box::new(tracker), lock))
    }

    /// Construit le traqueur et le verrou
    ///
    /// En cas d'échec le service est arrêté, l'erreur est conservée pour
    /// l'affichage et l'arrêt sera écrit lors de la prochaine persistance.
    pub fn init_components(&mut self) -> Result<()> {
        match self.build_components() {
            Ok((tracker, lock)) => {
                match &lock {
                    Some(lock) => info!(
                        "Service '{}' actif, verrou {}",
                        self.settings.name,
                        lock.describe()
                    ),
                    None => info!("Service '{}' actif, sans verrou", self.settings.name),
                }
                self.tracker = Some(tracker);
                self.lock = lock;
                self.initialized = true;
                self.last_error = None;
                Ok(())
            }
            Err(reason) => {
                error!(
                    "Impossible d'initialiser le service '{}': {}",
                    self.settings.name, reason
                );
                self.context
                    .events
                    .log_service_error(&self.settings.name, &reason);
                self.drop_components();
                self.settings.stopped = true;
                self.pending_write = true;
                self.last_error = Some(reason.clone());
                Err(Error::configuration(self.settings.name.clone(), reason))
            }
        }
    }

    fn drop_components(&mut self) {
        self.tracker = None;
        self.lock = None;
        self.initialized = false;
    }

    /// Écrit les paramètres dans le stockage et efface le marqueur
    pub fn persist_settings(&mut self) -> Result<()> {
        self.store().update_service(&self.settings)?;
        self.pending_write = false;
        debug!("Paramètres du service '{}' enregistrés", self.settings.name);
        Ok(())
    }

    /// Une passe du planificateur
    pub fn iteration(&mut self, now: DateTime<Utc>) {
        if self.pending_write {
            if let Err(e) = self.persist_settings() {
                error!(
                    "Impossible d'enregistrer les paramètres de '{}': {}",
                    self.settings.name, e
                );
            }
        }

        if self.settings.stopped {
            return;
        }

        if !self.initialized {
            if self.init_components().is_err() {
                // Arrêt forcé, écrit immédiatement
                if let Err(e) = self.persist_settings() {
                    error!(
                        "Impossible d'enregistrer l'arrêt de '{}': {}",
                        self.settings.name, e
                    );
                }
                return;
            }
        }

        if let Err(e) = self.refresh(now) {
            error!(
                "Erreur lors de l'expiration des blocages de '{}': {}",
                self.settings.name, e
            );
        }

        let addresses = match self.tracker.as_mut() {
            Some(tracker) => tracker.poll(),
            None => Vec::new(),
        };
        if addresses.is_empty() {
            return;
        }
        if let Err(e) = self.log_attempts(&addresses, now) {
            error!(
                "Erreur lors de l'enregistrement des tentatives sur '{}': {}",
                self.settings.name, e
            );
        }
    }

    /// Arrête ou relance le service, bascule si `stopped` vaut `None`
    ///
    /// Retourne le nouvel état d'arrêt. Une relance dont l'initialisation
    /// échoue laisse le service arrêté et remonte l'erreur de configuration.
    pub fn toggle_stopped(&mut self, stopped: Option<bool>) -> Result<bool> {
        let stop = stopped.unwrap_or(!self.settings.stopped);
        if stop == self.settings.stopped {
            return Ok(stop);
        }

        self.pending_write = true;
        if stop {
            self.settings.stopped = true;
            self.drop_components();
            self.last_error = None;
            info!("Service '{}' arrêté", self.settings.name);
        } else {
            self.settings.stopped = false;
            self.init_components()?;
            info!("Service '{}' relancé", self.settings.name);
        }
        Ok(self.settings.stopped)
    }

    /// Remplace les paramètres, l'identifiant est conservé
    ///
    /// Le traqueur et le verrou sont reconstruits à la prochaine passe.
    pub fn update_settings(&mut self, mut settings: ServiceSettings) -> Result<()> {
        settings
            .validate()
            .map_err(|reason| Error::configuration(settings.name.clone(), reason))?;
        settings.id = self.settings.id;

        if settings.kind != self.settings.kind || settings.log_path != self.settings.log_path {
            warn!(
                "Service '{}': changement de journal, le suivi reprend à la fin du fichier",
                self.settings.name
            );
        }

        self.settings = settings;
        self.drop_components();
        self.last_error = None;
        self.pending_write = true;
        info!("Paramètres du service '{}' mis à jour", self.settings.name);
        Ok(())
    }

    /// Arrête le service et supprime toutes ses données
    pub fn delete(&mut self) -> Result<()> {
        self.settings.stopped = true;
        self.drop_components();
        self.pending_write = false;
        self.store().delete_service(self.settings.id)?;
        info!("Service '{}' supprimé", self.settings.name);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::locks::CommandRunner;
    use crate::models::{Protocol, ServiceKind};
    use crate::store::RecordStore;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct NoCommands;

    impl CommandRunner for NoCommands {
        fn run(&self, _program: &str, _args: &[String]) -> bool {
            false
        }
    }

    /// Service SSH verrouillé via un hosts.deny temporaire
    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub store: Arc<RecordStore>,
        pub service: ProtectedService,
    }

    impl Fixture {
        pub fn log_path(&self) -> PathBuf {
            self.dir.path().join("auth.log")
        }

        pub fn hosts_deny(&self) -> String {
            fs::read_to_string(self.dir.path().join("hosts.deny")).unwrap_or_default()
        }
    }

    pub(crate) fn context(dir: &Path, store: Arc<RecordStore>) -> ServiceContext {
        ServiceContext {
            store,
            events: Arc::new(EventLogger::new(
                dir.join("zshield.log").to_string_lossy().into_owned(),
            )),
            locks: LockOptions {
                hosts_deny_path: dir.join("hosts.deny"),
                blocked_pages_dir: dir.to_path_buf(),
                protocol: Protocol::Tcp,
                container_mirror: false,
                runner: Arc::new(NoCommands),
            },
        }
    }

    pub(crate) fn fixture(time_threshold: u32, max_attempts: u32, block_duration: Option<u32>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("auth.log");
        fs::write(&log_path, "").unwrap();

        let store = Arc::new(RecordStore::in_memory());
        let mut settings = ServiceSettings {
            id: 0,
            name: "SSH".to_string(),
            kind: ServiceKind::Ssh,
            time_threshold,
            max_attempts,
            block_duration,
            log_path: log_path.to_string_lossy().into_owned(),
            lock_resource: Some("sshd".to_string()),
            stopped: false,
        };
        settings.id = store.insert_service(&settings).unwrap();

        let service = ProtectedService::new(settings, context(dir.path(), store.clone()));
        Fixture { dir, store, service }
    }

    #[test]
    fn test_initialization_activates_service() {
        let mut f = fixture(5, 3, Some(10));
        assert_eq!(f.service.state(), ServiceState::Uninitialized);
        f.service.init_components().unwrap();
        assert_eq!(f.service.state(), ServiceState::Active);
    }

    #[test]
    fn test_bad_log_path_stops_service() {
        let mut f = fixture(5, 3, Some(10));
        f.service.settings.log_path = "/chemin/inexistant/auth.log".to_string();

        f.service.iteration(Utc::now());

        assert_eq!(f.service.state(), ServiceState::Error);
        assert!(f.service.last_error().is_some());
        assert!(!f.service.has_pending_write());
        let stored = f.store.load_services().unwrap();
        assert!(stored[0].stopped);
    }

    #[test]
    fn test_unknown_kind_from_store_stops_service() {
        let mut f = fixture(5, 3, Some(10));
        let mut settings = f.service.settings().clone();
        settings.kind = ServiceKind::Unknown;
        f.store.update_service(&settings).unwrap();

        let stored = f.store.load_services().unwrap().remove(0);
        let mut service = ProtectedService::new(stored, f.service.context.clone());
        service.iteration(Utc::now());

        assert_eq!(service.state(), ServiceState::Error);
        assert!(service.last_error().unwrap().contains("unknown"));
        assert!(!service.has_pending_write());
        assert!(f.store.load_services().unwrap()[0].stopped);
        assert_eq!(f.hosts_deny(), "");
    }

    #[test]
    fn test_bad_firewall_stops_only_that_service() {
        let mut f = fixture(5, 3, Some(10));
        f.service.settings.lock_resource = Some("22".to_string());
        let err = f.service.init_components().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(f.service.state(), ServiceState::Error);
    }

    #[test]
    fn test_iteration_blocks_offender_from_log() {
        let mut f = fixture(5, 3, Some(10));
        let now = Utc::now();
        f.service.iteration(now);
        assert_eq!(f.service.state(), ServiceState::Active);

        let mut log = fs::OpenOptions::new().append(true).open(f.log_path()).unwrap();
        use std::io::Write;
        for _ in 0..3 {
            writeln!(
                log,
                "Mar 10 10:00:00 host sshd[1]: Failed password for root from 10.0.0.7 port 2222 ssh2"
            )
            .unwrap();
        }

        f.service.iteration(now);
        assert!(f.service.is_blocked("10.0.0.7").unwrap());
        assert_eq!(f.hosts_deny(), "sshd : 10.0.0.7\n");
    }

    #[test]
    fn test_settings_writes_are_deferred() {
        let mut f = fixture(5, 3, Some(10));
        let mut settings = f.service.settings().clone();
        settings.max_attempts = 7;
        f.service.update_settings(settings).unwrap();

        assert!(f.service.has_pending_write());
        assert_eq!(f.store.load_services().unwrap()[0].max_attempts, 3);

        f.service.iteration(Utc::now());
        assert!(!f.service.has_pending_write());
        assert_eq!(f.store.load_services().unwrap()[0].max_attempts, 7);
    }

    #[test]
    fn test_update_rejects_invalid_thresholds() {
        let mut f = fixture(5, 3, Some(10));
        let mut settings = f.service.settings().clone();
        settings.max_attempts = 0;
        assert!(f.service.update_settings(settings).is_err());
        assert!(!f.service.has_pending_write());
    }

    #[test]
    fn test_toggle_stopped() {
        let mut f = fixture(5, 3, Some(10));
        assert!(f.service.toggle_stopped(None).unwrap());
        assert_eq!(f.service.state(), ServiceState::Stopped);

        assert!(!f.service.toggle_stopped(Some(false)).unwrap());
        assert_eq!(f.service.state(), ServiceState::Active);

        f.service.settings.log_path = "/chemin/inexistant".to_string();
        f.service.toggle_stopped(Some(true)).unwrap();
        assert!(f.service.toggle_stopped(Some(false)).is_err());
        assert_eq!(f.service.state(), ServiceState::Error);

        // Un arrêt manuel efface l'erreur précédente
        f.service.toggle_stopped(Some(true)).unwrap();
        assert_eq!(f.service.state(), ServiceState::Stopped);
        assert!(f.service.last_error().is_none());
    }

    #[test]
    fn test_delete_removes_records() {
        let mut f = fixture(5, 3, Some(10));
        f.service.init_components().unwrap();
        f.service.block("10.0.0.1", Utc::now()).unwrap();

        f.service.delete().unwrap();
        assert!(f.store.load_services().unwrap().is_empty());
        assert!(f.store.active_block(f.service.id(), "10.0.0.1").unwrap().is_none());
    }
}
