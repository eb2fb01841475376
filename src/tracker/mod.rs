//! Suivi des journaux d'authentification
//!
//! Un [`LogSniffer`] lit les lignes ajoutées à un fichier de log depuis le
//! dernier appel et renvoie les adresses des tentatives échouées. Chaque appel
//! à `poll` renvoie un lot fini ; l'appelant le rappelle à chaque passe.

pub mod patterns;

use log::{debug, warn};
use regex::Regex;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Source de tentatives de connexion échouées
pub trait LoginTracker: Send {
    /// Adresses ayant échoué depuis le dernier appel, une entrée par échec
    fn poll(&mut self) -> Vec<String>;
}

/// Lecture incrémentale d'un fichier de log
pub struct LogSniffer {
    path: PathBuf,
    previous_size: u64,
    file_id: Option<u64>,
    reader: BufReader<File>,
    /// Ligne incomplète lue lors du précédent appel
    pending: Vec<u8>,
    patterns: Vec<Regex>,
}

impl LogSniffer {
    /// Ouvre le fichier et se place à la fin : seules les nouvelles lignes comptent
    pub fn new(path: impl AsRef<Path>, patterns: Vec<Regex>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} est un répertoire", path.display()),
            ));
        }
        let previous_size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            previous_size,
            file_id: file_id(&metadata),
            reader: BufReader::new(file),
            pending: Vec::new(),
            patterns,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rouvre le fichier depuis le début (rotation ou troncature)
    fn reopen(&mut self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        self.file_id = file_id(&file.metadata()?);
        self.reader = BufReader::new(file);
        self.pending.clear();
        Ok(())
    }

    /// Détecte une rotation/troncature et repositionne le curseur si besoin
    fn check_rotation(&mut self) -> io::Result<()> {
        let metadata = std::fs::metadata(&self.path)?;
        let size = metadata.len();
        let replaced = match (self.file_id, file_id(&metadata)) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };

        if size < self.previous_size || replaced {
            debug!("Fichier {} tronqué ou remplacé, relecture depuis le début", self.path.display());
            self.reopen()?;
        }
        self.previous_size = size;
        Ok(())
    }

    /// Lit les lignes complètes disponibles
    fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending)?;
            if read == 0 || self.pending.last() != Some(&b'\n') {
                // Fin des données : la ligne partielle attend le prochain appel
                break;
            }
            let line = String::from_utf8_lossy(&self.pending);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
            self.pending.clear();
        }
        Ok(lines)
    }

    /// Adresses extraites d'une ligne, répétées autant de fois que nécessaire
    fn extract(&self, line: &str) -> Vec<String> {
        for pattern in &self.patterns {
            let Some(caps) = pattern.captures(line) else {
                continue;
            };
            return match (caps.get(1), caps.get(2)) {
                (Some(count), Some(address)) => {
                    let count = count.as_str().parse::<usize>().unwrap_or(1);
                    vec![address.as_str().to_string(); count]
                }
                (Some(address), None) => vec![address.as_str().to_string()],
                _ => Vec::new(),
            };
        }
        Vec::new()
    }
}

impl LoginTracker for LogSniffer {
    fn poll(&mut self) -> Vec<String> {
        if let Err(e) = self.check_rotation() {
            // Fichier momentanément absent pendant une rotation
            warn!("Impossible de vérifier {}: {}", self.path.display(), e);
            return Vec::new();
        }

        let lines = match self.read_lines() {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Erreur de lecture de {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        lines.iter().flat_map(|line| self.extract(line)).collect()
    }
}

#[cfg(unix)]
fn file_id(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_id(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceKind;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn ssh_sniffer(path: &Path) -> LogSniffer {
        LogSniffer::new(path, patterns::for_kind(ServiceKind::Ssh).unwrap()).unwrap()
    }

    const FAIL: &str = "Mar  3 12:00:01 host sshd[1]: Failed password for root from 10.0.0.1 port 22 ssh2\n";

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = LogSniffer::new(dir.path().join("absent.log"), Vec::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_existing_content_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, FAIL).unwrap();

        let mut sniffer = ssh_sniffer(&path);
        assert!(sniffer.poll().is_empty());

        append(&path, FAIL);
        assert_eq!(sniffer.poll(), vec!["10.0.0.1".to_string()]);
        assert!(sniffer.poll().is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "").unwrap();
        let mut sniffer = ssh_sniffer(&path);

        let (head, tail) = FAIL.split_at(30);
        append(&path, head);
        assert!(sniffer.poll().is_empty());

        append(&path, tail);
        assert_eq!(sniffer.poll(), vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn test_repeated_line_yields_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "").unwrap();
        let mut sniffer = ssh_sniffer(&path);

        append(
            &path,
            "Mar  3 12:00:05 host sshd[1]: message repeated 3 times: [ Failed password for root from 10.0.0.2 port 22 ssh2]\n",
        );
        assert_eq!(sniffer.poll(), vec!["10.0.0.2".to_string(); 3]);
    }

    #[test]
    fn test_truncation_rereads_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "").unwrap();
        let mut sniffer = ssh_sniffer(&path);

        append(&path, FAIL);
        append(&path, FAIL);
        assert_eq!(sniffer.poll().len(), 2);

        // Rotation : le fichier repart de zéro avec une nouvelle ligne
        std::fs::write(
            &path,
            "Mar  3 12:01:00 host sshd[1]: Failed password for bob from 10.0.0.3 port 22 ssh2\n",
        )
        .unwrap();
        assert_eq!(sniffer.poll(), vec!["10.0.0.3".to_string()]);
    }

    #[test]
    fn test_unmatched_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "").unwrap();
        let mut sniffer = ssh_sniffer(&path);

        append(&path, "Mar  3 12:00:01 host sshd[1]: Accepted publickey for root from 10.0.0.1\n");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xff, 0xfe, b'x', b'\n']).unwrap();
        assert!(sniffer.poll().is_empty());

        append(&path, FAIL);
        assert_eq!(sniffer.poll(), vec!["10.0.0.1".to_string()]);
    }
}
