//! Erreurs du moteur de protection

use crate::models::ServiceId;

/// Erreurs remontées par le moteur de protection
///
/// Les conditions récupérables (adresse invalide au fil de l'eau, opération
/// redondante, conflit avec une règle statique, échec du verrou) sont traitées
/// localement et ne passent pas par ce type, voir [`crate::models::ActionOutcome`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("adresse IP invalide: {0}")]
    InvalidAddress(String),
    #[error("configuration invalide pour le service '{service}': {reason}")]
    Configuration { service: String, reason: String },
    #[error("service {0} introuvable")]
    NotFound(ServiceId),
    #[error("erreur de stockage: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("tâche interrompue: {0}")]
    Task(String),
}

impl Error {
    pub fn configuration(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::Configuration {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
