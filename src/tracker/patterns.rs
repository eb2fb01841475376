//! Expressions régulières par type de service
//!
//! Chaque expression capture soit l'adresse seule, soit un nombre de
//! répétitions suivi de l'adresse (lignes « message repeated N times »).
//! L'ordre compte : la première expression qui correspond l'emporte.

use crate::logger::ADMIN_LOGIN_FAILURE;
use crate::models::ServiceKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Adresse IPv4 ou IPv6, la validation fine est faite ensuite
const ADDR: &str = r"(\d{1,3}(?:\.\d{1,3}){3}|[0-9a-fA-F]*:[0-9a-fA-F:.]+)";

/// Horodatage syslog (ex: "Mar  3 12:00:01")
const SYSLOG_TS: &str = r"^\w{3}\s*\d{1,2}\s\d{2}:\d{2}:\d{2}";

fn sources(kind: ServiceKind) -> Vec<String> {
    match kind {
        ServiceKind::Joomla => vec![format!(
            r"^\d{{4}}-\d{{2}}-\d{{2}}T\d{{2}}:\d{{2}}:\d{{2}}\+\d{{2}}:\d{{2}}\tINFO\s{}\tjoomlafailure\t.*Username.*password.*not.*match.*",
            ADDR
        )],
        ServiceKind::Wordpress => vec![format!(r"{}.*POST\s/wp-login\.php.*\s200\s\d+.*", ADDR)],
        ServiceKind::Ssh => vec![
            format!(r"{}.*ssh.*repeated\s(\d+)\stimes.*Fail.*password.*\s{}", SYSLOG_TS, ADDR),
            format!(r"{}.*ssh.*Fail.*password.*\s{}", SYSLOG_TS, ADDR),
        ],
        ServiceKind::Phpmyadmin => vec![format!(r"{}.*POST\s/index\.php.*\s200\s\d+.*", ADDR)],
        ServiceKind::Admin => vec![format!(r"{}\s{}", regex::escape(ADMIN_LOGIN_FAILURE), ADDR)],
        ServiceKind::Unknown => Vec::new(),
    }
}

static PATTERNS: Lazy<HashMap<ServiceKind, Vec<Regex>>> = Lazy::new(|| {
    ServiceKind::SUPPORTED
        .iter()
        .map(|kind| {
            let compiled = sources(*kind)
                .iter()
                .filter_map(|source| match Regex::new(source) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        log::error!("Expression invalide pour {}: {}", kind, e);
                        None
                    }
                })
                .collect();
            (*kind, compiled)
        })
        .collect()
});

/// Expressions compilées pour un type de service, `None` si le type n'en a pas
pub fn for_kind(kind: ServiceKind) -> Option<Vec<Regex>> {
    PATTERNS
        .get(&kind)
        .filter(|patterns| !patterns.is_empty())
        .cloned()
}
