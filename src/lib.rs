//! Bibliothèque zshield : prévention d'intrusion par analyse des journaux
//!
//! Chaque service protégé (SSH, WordPress, Joomla, phpMyAdmin, panneau
//! d'administration) suit son journal d'authentification, compte les échecs
//! par adresse dans une fenêtre glissante et bloque les adresses fautives au
//! bon endroit : pare-feu, fichier `.htaccess` ou `hosts.deny`.

// Modules principaux
pub mod models;    // Structures de données et modèles
pub mod config;    // Configuration du système
pub mod logger;    // Journalisation des événements
pub mod error;     // Erreurs du moteur
pub mod scheduler; // Boucle de protection

// Moteur de protection
pub mod protection; // Politique de blocage par service
pub mod tracker;    // Suivi incrémental des journaux
pub mod locks;      // Application des blocages au système
pub mod store;      // Stockage persistant

// Modules utilitaires
pub mod validation; // Validation des adresses IP
pub mod files;      // Écriture atomique des fichiers
pub mod cli;        // Interface en ligne de commande

// Re-export des structures principales pour faciliter l'utilisation
pub use error::{Error, Result};
pub use logger::{EventLogger, LogMode};
pub use models::{ActionOutcome, BlockedFilter, ServiceInfo, ServiceKind, ServiceSettings, ServiceState};
pub use protection::{ProtectedService, ServiceContext};
pub use scheduler::ProtectionScheduler;
pub use store::{RecordStore, Store};
