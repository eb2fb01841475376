use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifiant d'un service protégé, attribué par le stockage
pub type ServiceId = u32;

/// Type de service surveillé, chacun lié à son jeu d'expressions régulières
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Joomla,
    Wordpress,
    Ssh,
    Phpmyadmin,
    /// Connexion au panneau d'administration de zshield lui-même
    Admin,
    /// Type inconnu (enregistrement écrit par une autre version)
    #[serde(other)]
    Unknown,
}

impl ServiceKind {
    /// Types que l'on peut enregistrer
    pub const SUPPORTED: [ServiceKind; 5] = [
        ServiceKind::Joomla,
        ServiceKind::Wordpress,
        ServiceKind::Ssh,
        ServiceKind::Phpmyadmin,
        ServiceKind::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Joomla => "joomla",
            ServiceKind::Wordpress => "wordpress",
            ServiceKind::Ssh => "ssh",
            ServiceKind::Phpmyadmin => "phpmyadmin",
            ServiceKind::Admin => "admin",
            ServiceKind::Unknown => "unknown",
        }
    }

    /// Le service d'administration n'utilise aucun verrou
    pub fn is_admin(&self) -> bool {
        *self == ServiceKind::Admin
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::SUPPORTED
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("type de service non supporté: {}", s))
    }
}

/// Protocole utilisé pour les règles de pare-feu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// Paramètres d'un service protégé
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// 0 tant que le service n'a pas été enregistré
    #[serde(default)]
    pub id: ServiceId,
    /// Nom affiché (ex: "Serveur SSH interne")
    pub name: String,
    pub kind: ServiceKind,
    /// Fenêtre glissante en minutes
    pub time_threshold: u32,
    /// Nombre de tentatives dans la fenêtre avant blocage
    pub max_attempts: u32,
    /// Durée de blocage en minutes, `None` pour un blocage permanent
    pub block_duration: Option<u32>,
    pub log_path: String,
    /// Numérique: port, contient un séparateur: répertoire web, sinon: démon
    pub lock_resource: Option<String>,
    pub stopped: bool,
}

impl ServiceSettings {
    /// Vérifie la cohérence des seuils
    ///
    /// Une durée de blocage nulle est ramenée à un blocage permanent.
    pub fn validate(&mut self) -> Result<(), String> {
        if self.kind == ServiceKind::Unknown {
            return Err("type de service inconnu".to_string());
        }
        if self.max_attempts < 1 {
            return Err("le nombre maximal de tentatives doit être au moins 1".to_string());
        }
        if self.time_threshold < 1 {
            return Err("la fenêtre de temps doit être d'au moins 1 minute".to_string());
        }
        if self.block_duration == Some(0) {
            log::warn!(
                "Durée de blocage nulle pour '{}', blocage permanent appliqué",
                self.name
            );
            self.block_duration = None;
        }
        Ok(())
    }
}

/// Tentative de connexion échouée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub service_id: ServiceId,
    pub address: String,
    pub timestamp: DateTime<Utc>,
}

/// Blocage dynamique, conservé inactif après déblocage pour l'historique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedRecord {
    pub service_id: ServiceId,
    pub address: String,
    pub blocked_at: DateTime<Utc>,
    pub active: bool,
}

/// Règle de liste blanche/noire pour une adresse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticRule {
    pub service_id: ServiceId,
    pub address: String,
    pub added_at: DateTime<Utc>,
    pub blocked: bool,
}

impl StaticRule {
    pub fn list(&self) -> ListKind {
        ListKind::from_blocked(self.blocked)
    }
}

/// Liste à laquelle appartient une règle statique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Whitelist,
    Blacklist,
}

impl ListKind {
    pub fn from_blocked(blocked: bool) -> Self {
        if blocked {
            ListKind::Blacklist
        } else {
            ListKind::Whitelist
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Whitelist => f.write_str("liste blanche"),
            ListKind::Blacklist => f.write_str("liste noire"),
        }
    }
}

/// Résultat d'une action de blocage/déblocage ou d'une tentative journalisée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    /// L'action a été appliquée
    Applied,
    /// Adresse déjà bloquée, horodatage mis à jour
    Refreshed,
    /// Rien à faire (ex: déblocage d'une adresse non bloquée)
    Unchanged,
    /// Adresse malformée, rien n'a changé
    Invalid,
    /// Refusée à cause d'une règle statique
    Conflict(ListKind),
    /// Le verrou a échoué, l'état n'a pas changé
    Failed,
}

/// Sélection des blocages à lister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockedFilter {
    /// Blocages actifs
    Current,
    /// Blocages posés durant les dernières 24 heures
    Last24h,
    /// Tout l'historique
    Historic,
}

/// Entrée de la liste des adresses bloquées destinée à l'interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedEntry {
    pub address: String,
    /// `None` pour une adresse en liste noire
    pub blocked_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub blacklisted: bool,
}

/// État d'exécution d'un service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    /// Arrêté automatiquement par une erreur de configuration
    Error,
    /// En marche mais traqueur et verrou pas encore construits
    Uninitialized,
    Active,
}

/// Informations sur un service destinées à l'interface d'administration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub name: String,
    pub kind: ServiceKind,
    pub time_threshold: u32,
    pub max_attempts: u32,
    pub block_duration: Option<u32>,
    pub log_path: String,
    pub lock_resource: Option<String>,
    pub stopped: bool,
    pub state: ServiceState,
    /// Dernière erreur de configuration ayant arrêté le service
    pub error: Option<String>,
    pub blocked_now: usize,
    pub blocked_24h: usize,
    pub last_blocked: Option<String>,
}

/// Formate l'écart entre deux instants pour l'affichage
pub fn format_elapsed(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().unsigned_abs();
    let (value, unit) = if secs < 60 {
        (secs, "seconde")
    } else if secs < 3600 {
        (secs / 60, "minute")
    } else if secs < 86400 {
        (secs / 3600, "heure")
    } else {
        (secs / 86400, "jour")
    };
    format!("il y a {} {}{}", value, unit, if value > 1 { "s" } else { "" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn settings() -> ServiceSettings {
        ServiceSettings {
            id: 1,
            name: "ssh".to_string(),
            kind: ServiceKind::Ssh,
            time_threshold: 5,
            max_attempts: 3,
            block_duration: Some(10),
            log_path: "/var/log/auth.log".to_string(),
            lock_resource: Some("22".to_string()),
            stopped: false,
        }
    }

    #[test]
    fn test_validate_thresholds() {
        let mut s = settings();
        assert!(s.validate().is_ok());

        s.max_attempts = 0;
        assert!(s.validate().is_err());

        let mut s = settings();
        s.time_threshold = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_zero_duration_becomes_permanent() {
        let mut s = settings();
        s.block_duration = Some(0);
        assert!(s.validate().is_ok());
        assert_eq!(s.block_duration, None);
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let kind: ServiceKind = serde_json::from_str("\"proftpd\"").unwrap();
        assert_eq!(kind, ServiceKind::Unknown);
        let mut s = settings();
        s.kind = kind;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("SSH".parse::<ServiceKind>(), Ok(ServiceKind::Ssh));
        assert!("unknown".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn test_format_elapsed() {
        let now = Utc::now();
        assert_eq!(format_elapsed(now - Duration::seconds(1), now), "il y a 1 seconde");
        assert_eq!(format_elapsed(now - Duration::seconds(42), now), "il y a 42 secondes");
        assert_eq!(format_elapsed(now - Duration::minutes(3), now), "il y a 3 minutes");
        assert_eq!(format_elapsed(now - Duration::hours(1), now), "il y a 1 heure");
        assert_eq!(format_elapsed(now - Duration::days(2), now), "il y a 2 jours");
        assert_eq!(format_elapsed(now + Duration::minutes(2), now), "il y a 2 minutes");
    }
}
