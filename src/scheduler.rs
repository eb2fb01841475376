//! Planificateur de la protection
//!
//! Une seule tâche fait tourner la boucle : à chaque passe, chaque service
//! exécute son itération, l'un après l'autre, dans un thread bloquant (les
//! verrous lancent des sous-processus et réécrivent des fichiers). Les
//! opérations d'administration passent par le même chemin.

use crate::config::{AdminServiceConfig, Config};
use crate::error::{Error, Result};
use crate::locks::LockOptions;
use crate::logger::EventLogger;
use crate::models::{ServiceId, ServiceInfo, ServiceKind, ServiceSettings};
use crate::protection::{ProtectedService, ServiceContext};
use crate::store::RecordStore;
use anyhow::Context;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

pub type SharedService = Arc<Mutex<ProtectedService>>;

/// Attente maximale d'une écriture de paramètres en suspens : 50 × 100 ms
const PENDING_WRITE_RETRIES: u32 = 50;
const PENDING_WRITE_POLL: Duration = Duration::from_millis(100);

/// Nom du service protégeant le panneau d'administration
pub const ADMIN_SERVICE_NAME: &str = "Administration zshield";

/// Exécute une opération synchrone hors des threads asynchrones
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

/// Pause avant la passe suivante, jamais sous le plancher
pub fn sleep_duration(interval: Duration, min_sleep: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(min_sleep)
}

pub struct ProtectionScheduler {
    context: ServiceContext,
    /// Services dans l'ordre d'enregistrement
    services: RwLock<Vec<(ServiceId, SharedService)>>,
    interval: Duration,
    min_sleep: Duration,
    admin_defaults: AdminServiceConfig,
}

impl ProtectionScheduler {
    pub fn new(context: ServiceContext, interval: Duration, min_sleep: Duration) -> Self {
        Self {
            context,
            services: RwLock::new(Vec::new()),
            interval,
            min_sleep,
            admin_defaults: AdminServiceConfig::default(),
        }
    }

    /// Construit le planificateur et son stockage depuis la configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = RecordStore::open(Path::new(&config.store_path))
            .context("Impossible d'ouvrir le stockage")?;
        let context = ServiceContext {
            store: Arc::new(store),
            events: Arc::new(EventLogger::from_config(config)),
            locks: LockOptions::from_config(config),
        };

        let mut scheduler = Self::new(
            context,
            Duration::from_millis(config.tick_interval_ms),
            Duration::from_millis(config.min_sleep_ms),
        );
        scheduler.admin_defaults = config.admin_service.clone();
        Ok(scheduler)
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Paramètres du service d'administration, qui suit le journal d'événements
    fn admin_settings(&self) -> ServiceSettings {
        ServiceSettings {
            id: 0,
            name: ADMIN_SERVICE_NAME.to_string(),
            kind: ServiceKind::Admin,
            time_threshold: self.admin_defaults.time_threshold,
            max_attempts: self.admin_defaults.max_attempts,
            block_duration: self.admin_defaults.block_duration,
            log_path: self.context.events.path().to_string(),
            lock_resource: None,
            stopped: false,
        }
    }

    /// Charge les services enregistrés, crée le service d'administration au
    /// premier démarrage
    pub async fn load(&self) -> Result<usize> {
        let store = self.context.store.clone();
        let admin = self.admin_settings();

        let stored = blocking(move || {
            let mut stored = store.load_services()?;
            if stored.is_empty() {
                let mut admin = admin;
                admin.id = store.insert_service(&admin)?;
                info!("Premier démarrage : service '{}' créé", admin.name);
                stored.push(admin);
            }
            Ok(stored)
        })
        .await?;

        let mut services = self.services.write().await;
        services.clear();
        for settings in stored {
            debug!("Service '{}' ({}) chargé", settings.name, settings.kind);
            let id = settings.id;
            let service = ProtectedService::new(settings, self.context.clone());
            services.push((id, Arc::new(Mutex::new(service))));
        }
        info!("{} service(s) chargé(s)", services.len());
        Ok(services.len())
    }

    /// Enregistre un service et tente aussitôt de l'initialiser
    ///
    /// Une configuration inutilisable n'empêche pas l'enregistrement : le
    /// service est conservé arrêté, avec l'erreur visible dans ses informations.
    pub async fn add_service(&self, mut settings: ServiceSettings) -> Result<ServiceId> {
        settings
            .validate()
            .map_err(|reason| Error::configuration(settings.name.clone(), reason))?;
        let context = self.context.clone();

        let service = blocking(move || {
            settings.id = context.store.insert_service(&settings)?;
            let mut service = ProtectedService::new(settings, context);
            if !service.settings().stopped && service.init_components().is_err() {
                service.persist_settings()?;
            }
            Ok(service)
        })
        .await?;

        let id = service.id();
        info!("Service '{}' enregistré (id {})", service.name(), id);
        self.services
            .write()
            .await
            .push((id, Arc::new(Mutex::new(service))));
        Ok(id)
    }

    pub async fn get_service(&self, id: ServiceId) -> Result<SharedService> {
        self.services
            .read()
            .await
            .iter()
            .find(|(service_id, _)| *service_id == id)
            .map(|(_, service)| service.clone())
            .ok_or(Error::NotFound(id))
    }

    /// Exécute une opération synchrone sur un service
    pub async fn with_service<T, F>(&self, id: ServiceId, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProtectedService) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.get_service(id).await?;
        blocking(move || {
            let mut guard = service.blocking_lock();
            f(&mut *guard)
        })
        .await
    }

    /// Arrête le service, supprime ses données et le retire de la liste
    pub async fn remove_service(&self, id: ServiceId) -> Result<()> {
        self.with_service(id, |service| service.delete()).await?;
        self.services
            .write()
            .await
            .retain(|(service_id, _)| *service_id != id);
        Ok(())
    }

    async fn snapshot(&self) -> Vec<SharedService> {
        self.services
            .read()
            .await
            .iter()
            .map(|(_, service)| service.clone())
            .collect()
    }

    /// Attend que les paramètres en suspens soient écrits, sans bloquer indéfiniment
    async fn wait_until_persisted(service: &SharedService) {
        for _ in 0..PENDING_WRITE_RETRIES {
            if !service.lock().await.has_pending_write() {
                return;
            }
            tokio::time::sleep(PENDING_WRITE_POLL).await;
        }
        warn!("Paramètres toujours en attente d'écriture, lecture de l'état courant");
    }

    async fn info_of(service: SharedService) -> Result<ServiceInfo> {
        Self::wait_until_persisted(&service).await;
        blocking(move || {
            let guard = service.blocking_lock();
            guard.get_info(Utc::now())
        })
        .await
    }

    pub async fn service_info(&self, id: ServiceId) -> Result<ServiceInfo> {
        let service = self.get_service(id).await?;
        Self::info_of(service).await
    }

    /// État de tous les services, dans l'ordre d'enregistrement
    pub async fn list_service_status(&self) -> Result<Vec<ServiceInfo>> {
        let mut infos = Vec::new();
        for service in self.snapshot().await {
            infos.push(Self::info_of(service).await?);
        }
        Ok(infos)
    }

    pub async fn admin_service(&self) -> Option<SharedService> {
        for service in self.snapshot().await {
            if service.lock().await.settings().kind.is_admin() {
                return Some(service);
            }
        }
        None
    }

    /// Permet à l'interface d'administration de refuser un client déjà bloqué
    pub async fn is_admin_blocked(&self, address: &str) -> Result<bool> {
        let Some(service) = self.admin_service().await else {
            return Ok(false);
        };
        let address = address.to_string();
        blocking(move || {
            let guard = service.blocking_lock();
            guard.is_blocked(&address)
        })
        .await
    }

    /// Écrit les paramètres en suspens de tous les services
    pub async fn persist_pending(&self) -> Result<usize> {
        let mut written = 0;
        for service in self.snapshot().await {
            let persisted = blocking(move || {
                let mut guard = service.blocking_lock();
                if !guard.has_pending_write() {
                    return Ok(false);
                }
                guard.persist_settings()?;
                Ok(true)
            })
            .await?;
            if persisted {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Une passe : chaque service, dans l'ordre, l'un après l'autre
    pub async fn tick(&self) {
        for service in self.snapshot().await {
            let result = tokio::task::spawn_blocking(move || {
                service.blocking_lock().iteration(Utc::now());
            })
            .await;
            if let Err(e) = result {
                error!("Itération interrompue: {}", e);
            }
        }
    }

    /// Boucle principale jusqu'au signal d'arrêt
    ///
    /// Le signal n'est observé que pendant la pause : une passe en cours,
    /// et donc toute réécriture de fichier de verrou, va toujours à son terme.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Protection démarrée (intervalle {:?}, pause minimale {:?})",
            self.interval, self.min_sleep
        );

        loop {
            let started = Instant::now();
            self.tick().await;
            let pause = sleep_duration(self.interval, self.min_sleep, started.elapsed());

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Arrêt de la protection demandé");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        match self.persist_pending().await {
            Ok(0) => {}
            Ok(count) => info!("{} paramètre(s) en suspens enregistré(s)", count),
            Err(e) => error!("Impossible d'enregistrer les paramètres en suspens: {}", e),
        }
    }
}
