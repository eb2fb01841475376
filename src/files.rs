//! Réécriture atomique des fichiers gérés par zshield

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn temporary_sibling(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("chemin sans nom de fichier: {}", path.display()),
        )
    })?;
    Ok(path.with_file_name(format!(".{}.zshield.tmp", name.to_string_lossy())))
}

/// Écrit `contents` dans un fichier voisin puis le renomme sur `path`
///
/// Un lecteur voit soit l'ancien contenu soit le nouveau, jamais un fichier
/// à moitié écrit. Les permissions du fichier remplacé sont conservées.
pub fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temporary_sibling(path)?;
    fs::write(&tmp, contents)?;

    if let Ok(metadata) = fs::metadata(path) {
        if let Err(e) = fs::set_permissions(&tmp, metadata.permissions()) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        e
    })
}

/// Lit un fichier texte, `None` s'il n'existe pas
pub fn read_if_exists(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
