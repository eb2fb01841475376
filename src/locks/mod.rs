//! Verrous d'application des blocages
//!
//! Un verrou traduit une décision de blocage en modification concrète du
//! système : règle de pare-feu, fichier `.htaccess` ou `hosts.deny`.

pub mod command;
pub mod firewall;
pub mod hosts_deny;
pub mod htaccess;

pub use command::{CommandRunner, SystemCommandRunner};
pub use firewall::FirewallLock;
pub use hosts_deny::DaemonAccessLock;
pub use htaccess::PathAccessLock;

use crate::config::{Config, BLOCKED_PAGE_PERM, BLOCKED_PAGE_TEMP};
use crate::models::{Protocol, ServiceSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Capacité commune à tous les verrous
///
/// Le résultat est la conjonction des résultats par adresse ; un échec
/// n'interrompt pas le traitement des adresses suivantes.
pub trait ServiceLock: Send {
    fn block(&self, addresses: &[String]) -> bool;
    fn unblock(&self, addresses: &[String]) -> bool;
}

/// Options partagées par tous les verrous, issues de la configuration
#[derive(Clone)]
pub struct LockOptions {
    pub hosts_deny_path: PathBuf,
    pub blocked_pages_dir: PathBuf,
    pub protocol: Protocol,
    pub container_mirror: bool,
    pub runner: Arc<dyn CommandRunner>,
}

impl LockOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hosts_deny_path: PathBuf::from(&config.hosts_deny_path),
            blocked_pages_dir: PathBuf::from(&config.blocked_pages_dir),
            protocol: config.firewall_protocol,
            container_mirror: config.container_mirror,
            runner: Arc::new(SystemCommandRunner),
        }
    }

    /// Page affichée aux clients bloqués
    pub fn blocked_page(&self, temporary: bool) -> PathBuf {
        let name = if temporary {
            BLOCKED_PAGE_TEMP
        } else {
            BLOCKED_PAGE_PERM
        };
        self.blocked_pages_dir.join(name)
    }
}

pub enum EnforcementLock {
    Firewall(FirewallLock),
    PathAccess(PathAccessLock),
    DaemonAccess(DaemonAccessLock),
}

impl EnforcementLock {
    /// Choisit le verrou d'après la syntaxe de `lock_resource`
    ///
    /// `Ok(None)` pour le service d'administration, qui n'a pas de verrou.
    pub fn for_settings(
        settings: &ServiceSettings,
        options: &LockOptions,
    ) -> Result<Option<Self>, String> {
        if settings.kind.is_admin() {
            return Ok(None);
        }

        let resource = settings
            .lock_resource
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| "aucune ressource de verrouillage définie".to_string())?;

        if resource.chars().all(|c| c.is_ascii_digit()) {
            let port: u16 = resource
                .parse()
                .map_err(|_| format!("port invalide: {}", resource))?;
            let lock = FirewallLock::new(
                port,
                options.protocol,
                options.container_mirror,
                options.runner.clone(),
            )?;
            return Ok(Some(EnforcementLock::Firewall(lock)));
        }

        if resource.contains('/') || resource.contains('\\') {
            let page = options.blocked_page(settings.block_duration.is_some());
            let lock = PathAccessLock::new(Path::new(resource), &page)
                .map_err(|e| format!("répertoire {} inutilisable: {}", resource, e))?;
            return Ok(Some(EnforcementLock::PathAccess(lock)));
        }

        Ok(Some(EnforcementLock::DaemonAccess(DaemonAccessLock::new(
            resource,
            &options.hosts_deny_path,
        ))))
    }

    pub fn describe(&self) -> String {
        match self {
            EnforcementLock::Firewall(lock) => format!("pare-feu (port {})", lock.port()),
            EnforcementLock::PathAccess(lock) => format!("htaccess ({})", lock.path().display()),
            EnforcementLock::DaemonAccess(lock) => format!("hosts.deny ({})", lock.daemon()),
        }
    }

    fn inner(&self) -> &dyn ServiceLock {
        match self {
            EnforcementLock::Firewall(lock) => lock,
            EnforcementLock::PathAccess(lock) => lock,
            EnforcementLock::DaemonAccess(lock) => lock,
        }
    }
}

impl ServiceLock for EnforcementLock {
    fn block(&self, addresses: &[String]) -> bool {
        self.inner().block(addresses)
    }

    fn unblock(&self, addresses: &[String]) -> bool {
        self.inner().unblock(addresses)
    }
}
