//! Journalisation
//!
//! Deux niveaux coexistent : les messages de diagnostic passent par la façade
//! `log` (env_logger ou systemd-journal), et le journal d'événements
//! [`EventLogger`] garde la trace des blocages et des connexions refusées.
//! Le journal d'événements est aussi lu par le service d'administration.

use crate::config::Config;
use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Mode de journalisation utilisé par le système
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogMode {
    /// Journal dans un fichier local
    #[default]
    File,
    /// Journal via systemd-journal
    SystemdJournal,
}

/// Préfixe des lignes de connexion refusée au panneau d'administration
pub const ADMIN_LOGIN_FAILURE: &str = "[AVERTISSEMENT] Échec de connexion au panneau d'administration depuis";

/// Initialise la façade `log` selon la configuration
pub fn init_logging(config: &Config) {
    match config.log_mode {
        LogMode::File => {
            init_env_logger(&config.log_level);
        }
        LogMode::SystemdJournal => {
            #[cfg(feature = "systemd")]
            {
                use systemd_journal_logger::JournalLog;

                match JournalLog::new() {
                    Ok(logger) => {
                        if let Err(e) = logger
                            .with_syslog_identifier("zshield".to_string())
                            .install()
                        {
                            eprintln!("Erreur lors de l'installation du logger systemd: {}", e);
                            init_env_logger(&config.log_level);
                        } else {
                            log::set_max_level(parse_level(&config.log_level));
                            info!("Logger systemd initialisé avec niveau: {}", config.log_level);
                        }
                    }
                    Err(e) => {
                        eprintln!("Erreur lors de l'initialisation du logger systemd: {}", e);
                        init_env_logger(&config.log_level);
                    }
                }
            }

            #[cfg(not(feature = "systemd"))]
            {
                eprintln!("AVERTISSEMENT: Le mode SystemdJournal n'est pas disponible (feature 'systemd' non activée). Utilisation du logger standard à la place.");
                init_env_logger(&config.log_level);
            }
        }
    }
}

fn init_env_logger(level: &str) {
    // Un second appel (tests) ne doit pas paniquer
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init();
}

#[cfg_attr(not(feature = "systemd"), allow(dead_code))]
fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Journal des événements de protection
pub struct EventLogger {
    log_file: Mutex<Option<File>>,
    log_path: String,
    log_mode: LogMode,
}

impl EventLogger {
    pub fn new(log_path: String) -> Self {
        Self::new_with_mode(log_path, LogMode::File)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new_with_mode(config.log_file.clone(), config.log_mode)
    }

    pub fn new_with_mode(log_path: String, log_mode: LogMode) -> Self {
        // Le fichier existe dans les deux modes : le service `admin` le suit
        Self {
            log_file: Mutex::new(Self::open(&log_path)),
            log_path,
            log_mode,
        }
    }

    fn open(log_path: &str) -> Option<File> {
        if let Some(parent) = Path::new(log_path).parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("Erreur lors de la création du répertoire de logs: {}", e);
            }
        }

        match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(file) => Some(file),
            Err(e) => {
                error!("Erreur lors de l'ouverture du fichier de log {}: {}", log_path, e);
                None
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.log_path
    }

    pub fn log_block(&self, service: &str, address: &str) {
        self.write_event("BLOCK", &format!("{} bloquée pour le service '{}'", address, service));
    }

    pub fn log_unblock(&self, service: &str, address: &str) {
        self.write_event("UNBLOCK", &format!("{} débloquée pour le service '{}'", address, service));
    }

    pub fn log_static_rule(&self, service: &str, address: &str, blocked: bool) {
        let list = if blocked { "liste noire" } else { "liste blanche" };
        self.write_event("RULE", &format!("{} ajoutée à la {} de '{}'", address, list, service));
    }

    pub fn log_service_error(&self, service: &str, reason: &str) {
        self.write_event("ERROR", &format!("Service '{}' arrêté: {}", service, reason));
    }

    /// Enregistre une connexion refusée au panneau d'administration
    ///
    /// La ligne produite est celle que surveille le service `admin`, elle va
    /// donc toujours dans le fichier, y compris en mode systemd-journal.
    pub fn log_admin_login_failure(&self, address: &str) {
        let line = format!("{} {}", ADMIN_LOGIN_FAILURE, address);
        if self.log_mode == LogMode::SystemdJournal {
            warn!("{}", line);
        }
        self.write_line(&line);
    }

    fn write_event(&self, tag: &str, message: &str) {
        let line = format!("[{}] {}", tag, message);
        match self.log_mode {
            LogMode::File => self.write_line(&line),
            LogMode::SystemdJournal => match tag {
                "ERROR" => error!("{}", line),
                "BLOCK" => warn!("{}", line),
                _ => info!("{}", line),
            },
        }
    }

    fn write_line(&self, line: &str) {
        let timestamp: DateTime<Local> = Local::now();
        let entry = format!("[{}] {}\n", timestamp.format("%Y-%m-%d %H:%M:%S%.3f"), line);

        let mut guard = match self.log_file.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!("Erreur lors de l'acquisition du verrou pour le fichier de log: {}", e);
                return;
            }
        };

        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(entry.as_bytes()) {
                error!("Erreur lors de l'écriture dans le fichier de log: {}", e);
                *guard = Self::open(&self.log_path);
            }
        }
    }
}
