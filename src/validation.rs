//! Validation des adresses IP
//!
//! Toutes les adresses manipulées par le moteur passent par ici : elles sont
//! ramenées en minuscules puis vérifiées comme littéraux IPv4/IPv6.

use std::net::IpAddr;

/// Vrai si la chaîne est un littéral IPv4 ou IPv6 bien formé
pub fn is_valid(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok()
}

/// Forme canonique utilisée pour le stockage et la comparaison
pub fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Normalise puis valide, `None` si l'adresse est malformée
pub fn canonical(address: &str) -> Option<String> {
    let address = normalize(address);
    if is_valid(&address) {
        Some(address)
    } else {
        None
    }
}
