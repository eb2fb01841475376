use crate::config::CONFIG_FILE;
use crate::models::{ServiceId, ServiceInfo, ServiceKind, ServiceSettings, ServiceState};
use clap::{Args, Parser, Subcommand};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    /// Fichier de configuration
    #[clap(long, short, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Lance la protection au premier plan (Ctrl-C pour arrêter)
    Run,
    /// Affiche l'état des services protégés
    Status {
        /// Sortie JSON
        #[clap(long)]
        json: bool,
    },
    /// Enregistre un nouveau service (pris en compte au prochain démarrage)
    Add(AddArgs),
    /// Supprime un service et tout son historique
    Remove {
        /// Identifiant du service
        id: ServiceId,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Nom affiché
    #[clap(long)]
    pub name: String,
    /// Type de service (joomla, wordpress, ssh, phpmyadmin, admin)
    #[clap(long)]
    pub kind: ServiceKind,
    /// Journal à surveiller
    #[clap(long)]
    pub log_path: String,
    /// Port, répertoire web ou nom de démon
    #[clap(long)]
    pub lock: Option<String>,
    /// Fenêtre de comptage en minutes
    #[clap(long, default_value_t = 5)]
    pub time_threshold: u32,
    /// Tentatives autorisées dans la fenêtre
    #[clap(long, default_value_t = 5)]
    pub max_attempts: u32,
    /// Durée de blocage en minutes (permanent si absent)
    #[clap(long)]
    pub block_duration: Option<u32>,
    /// Enregistrer le service à l'arrêt
    #[clap(long)]
    pub stopped: bool,
}

impl AddArgs {
    pub fn into_settings(self) -> ServiceSettings {
        ServiceSettings {
            id: 0,
            name: self.name,
            kind: self.kind,
            time_threshold: self.time_threshold,
            max_attempts: self.max_attempts,
            block_duration: self.block_duration,
            log_path: self.log_path,
            lock_resource: self.lock,
            stopped: self.stopped,
        }
    }
}

fn state_label(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Stopped => "arrêté",
        ServiceState::Error => "en erreur",
        ServiceState::Uninitialized => "en attente",
        ServiceState::Active => "actif",
    }
}

/// Tableau lisible de l'état des services
pub fn render_status(infos: &[ServiceInfo]) -> String {
    if infos.is_empty() {
        return "Aucun service enregistré\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<4} {:<24} {:<11} {:<10} {:>8} {:>8}  {}",
        "ID", "NOM", "TYPE", "ÉTAT", "BLOQUÉES", "24H", "DERNIER BLOCAGE"
    );
    for info in infos {
        let _ = writeln!(
            out,
            "{:<4} {:<24} {:<11} {:<10} {:>8} {:>8}  {}",
            info.id,
            info.name,
            info.kind,
            state_label(info.state),
            info.blocked_now,
            info.blocked_24h,
            info.last_blocked.as_deref().unwrap_or("jamais"),
        );
        if let Some(reason) = &info.error {
            let _ = writeln!(out, "     erreur: {}", reason);
        }
    }
    out
}
