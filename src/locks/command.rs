use log::{debug, error};
use std::process::Command;

/// Exécution des outils système (ufw, iptables)
pub trait CommandRunner: Send + Sync {
    /// Exécute la commande et indique si elle a réussi
    fn run(&self, program: &str, args: &[String]) -> bool;
}

/// Exécute réellement les commandes via `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> bool {
        match Command::new(program).args(args).output() {
            Ok(output) => {
                if output.status.success() {
                    true
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    debug!("{} {} a échoué: {}", program, args.join(" "), stderr.trim());
                    false
                }
            }
            Err(e) => {
                error!("Erreur lors de l'exécution de la commande {}: {}", program, e);
                false
            }
        }
    }
}
