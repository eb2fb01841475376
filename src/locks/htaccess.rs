//! Verrou par répertoire web via un fichier `.htaccess` (Apache)
//!
//! Le fichier produit a toujours la forme :
//!
//! ```text
//! Order allow,deny
//! Allow from all
//! Deny from <adresse>
//! ...
//! ErrorDocument 403 "<page de blocage sur une ligne>"
//! <autres directives existantes>
//! ```
//!
//! Seules les directives hors de tout conteneur (`<Files>`, `<Directory>`...)
//! sont réordonnées, le contenu des conteneurs est recopié tel quel.

use super::ServiceLock;
use crate::files::{read_if_exists, write_atomically};
use crate::validation::normalize;
use log::{debug, error};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const HTACCESS_FILE: &str = ".htaccess";

pub struct PathAccessLock {
    path: PathBuf,
    blocked_page: String,
}

/// Contenu d'un `.htaccess` existant, découpé par rôle
#[derive(Debug, Default)]
struct HtAccess {
    allow: Vec<String>,
    denied: Vec<String>,
    rest: Vec<String>,
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.is_char_boundary(prefix.len())
        && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Adresse d'une ligne `Deny from <adresse>`
fn denied_address(line: &str) -> Option<String> {
    let line = line.trim();
    if starts_with_ignore_case(line, "deny from ") {
        Some(normalize(&line["deny from ".len()..]))
    } else {
        None
    }
}

/// Lignes du fichier, chacune marquée `true` si elle est hors conteneur
fn scoped_lines(content: &str) -> Vec<(&str, bool)> {
    let mut depth = 0usize;
    content
        .lines()
        .map(|raw| {
            let line = raw.trim_start();
            if line.starts_with("</") {
                depth = depth.saturating_sub(1);
                (raw, false)
            } else if line.starts_with('<') {
                depth += 1;
                (raw, false)
            } else {
                (raw, depth == 0)
            }
        })
        .collect()
}

impl HtAccess {
    fn parse(content: &str) -> Self {
        let mut parsed = HtAccess::default();
        for (raw, top_level) in scoped_lines(content) {
            if !top_level {
                parsed.rest.push(raw.to_string());
                continue;
            }
            let line = raw.trim();
            if line.is_empty()
                || starts_with_ignore_case(line, "order ")
                || starts_with_ignore_case(line, "errordocument 403 ")
            {
                continue;
            }
            if starts_with_ignore_case(line, "allow from ") {
                parsed.allow.push(line.to_string());
            } else if let Some(address) = denied_address(line) {
                if !parsed.denied.contains(&address) {
                    parsed.denied.push(address);
                }
            } else {
                parsed.rest.push(raw.to_string());
            }
        }
        parsed
    }

    fn render(&self, blocked_page: &str) -> String {
        let mut out = String::from("Order allow,deny\n");
        if self.allow.is_empty() {
            out.push_str("Allow from all\n");
        }
        for line in &self.allow {
            out.push_str(line);
            out.push('\n');
        }
        for address in &self.denied {
            out.push_str(&format!("Deny from {}\n", address));
        }
        out.push_str(&format!("ErrorDocument 403 \"{}\"\n", blocked_page));
        for line in &self.rest {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Page HTML ramenée sur une ligne, guillemets doubles remplacés
fn single_line_page(html: &str) -> String {
    html.replace(['\n', '\r'], "").replace('"', "'")
}

impl PathAccessLock {
    /// Échoue si le répertoire n'existe pas, n'est pas inscriptible,
    /// ou si la page de blocage est illisible
    pub fn new(directory: &Path, blocked_page: &Path) -> io::Result<Self> {
        if !directory.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} n'est pas un répertoire", directory.display()),
            ));
        }
        let html = fs::read_to_string(blocked_page)?;
        let path = directory.join(HTACCESS_FILE);
        // Ouverture en ajout : vérifie les droits sans toucher au contenu
        OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            blocked_page: single_line_page(&html),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_block(&self, addresses: &[String]) -> io::Result<()> {
        let content = read_if_exists(&self.path)?.unwrap_or_default();
        let mut parsed = HtAccess::parse(&content);
        for address in addresses.iter().map(|a| normalize(a)) {
            if !parsed.denied.contains(&address) {
                parsed.denied.push(address);
            }
        }
        write_atomically(&self.path, parsed.render(&self.blocked_page).as_bytes())
    }

    fn try_unblock(&self, addresses: &[String]) -> io::Result<()> {
        let Some(content) = read_if_exists(&self.path)? else {
            debug!("{} absent, rien à débloquer", self.path.display());
            return Ok(());
        };
        let targets: Vec<String> = addresses.iter().map(|a| normalize(a)).collect();

        let mut out = String::with_capacity(content.len());
        for (line, top_level) in scoped_lines(&content) {
            if top_level && denied_address(line).is_some_and(|address| targets.contains(&address)) {
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        write_atomically(&self.path, out.as_bytes())
    }
}

impl ServiceLock for PathAccessLock {
    fn block(&self, addresses: &[String]) -> bool {
        match self.try_block(addresses) {
            Ok(()) => true,
            Err(e) => {
                error!("Impossible de modifier {}: {}", self.path.display(), e);
                false
            }
        }
    }

    fn unblock(&self, addresses: &[String]) -> bool {
        match self.try_unblock(addresses) {
            Ok(()) => true,
            Err(e) => {
                error!("Impossible de modifier {}: {}", self.path.display(), e);
                false
            }
        }
    }
}
