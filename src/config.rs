use crate::logger::LogMode;
use crate::models::Protocol;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "/etc/zshield/config.json";

/// Nom de la page affichée pour un blocage temporaire
pub const BLOCKED_PAGE_TEMP: &str = "blocked_temp.html";
/// Nom de la page affichée pour un blocage permanent
pub const BLOCKED_PAGE_PERM: &str = "blocked_perm.html";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Version actuelle du logiciel
    pub version: String,

    /// Journal d'événements (blocages, déblocages, connexions admin échouées)
    pub log_file: String,

    /// Niveau de log
    pub log_level: String,

    /// Mode de journalisation (fichier ou systemd-journal)
    pub log_mode: LogMode,

    /// Fichier de stockage des services, tentatives et blocages
    pub store_path: String,

    /// Intervalle entre deux passes du planificateur (ms)
    pub tick_interval_ms: u64,

    /// Pause minimale entre deux passes (ms)
    pub min_sleep_ms: u64,

    /// Fichier de refus par démon (hosts.deny)
    pub hosts_deny_path: String,

    /// Répertoire contenant les pages affichées aux clients bloqués
    pub blocked_pages_dir: String,

    /// Protocole des règles de pare-feu
    pub firewall_protocol: Protocol,

    /// Recopier les règles dans la chaîne DOCKER-USER
    pub container_mirror: bool,

    /// Paramètres du service d'administration créé au premier démarrage
    pub admin_service: AdminServiceConfig,
}

/// Seuils du service protégeant le panneau d'administration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AdminServiceConfig {
    pub time_threshold: u32,
    pub max_attempts: u32,
    pub block_duration: Option<u32>,
}

impl Default for AdminServiceConfig {
    fn default() -> Self {
        Self {
            time_threshold: 5,
            max_attempts: 5,
            block_duration: Some(5),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: env!("CARGO_PKG_VERSION").to_string(),
            log_file: "/var/log/zshield/zshield.log".to_string(),
            log_level: "info".to_string(),
            log_mode: LogMode::File,
            store_path: "/var/lib/zshield/store.json".to_string(),
            tick_interval_ms: 500,
            min_sleep_ms: 10,
            hosts_deny_path: "/etc/hosts.deny".to_string(),
            blocked_pages_dir: "/etc/zshield/pages".to_string(),
            firewall_protocol: Protocol::Tcp,
            container_mirror: true,
            admin_service: AdminServiceConfig::default(),
        }
    }
}

impl Config {
    /// Charge la configuration depuis l'emplacement par défaut
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Charge la configuration, en créant le fichier par défaut s'il n'existe pas
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let default_config = Config::default();
            default_config.save_to(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Impossible de lire {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Configuration invalide dans {}", path.display()))?;

        Ok(config)
    }

    /// Sauvegarde la configuration dans le fichier
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Impossible de créer {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Impossible d'écrire {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.hosts_deny_path, "/etc/hosts.deny");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "log_level": "debug", "firewall_protocol": "udp" }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.firewall_protocol, Protocol::Udp);
        assert!(config.container_mirror);
        assert_eq!(config.admin_service, AdminServiceConfig::default());
    }
}
