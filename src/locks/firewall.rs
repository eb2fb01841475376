//! Verrou par port via le pare-feu (ufw)
//!
//! Chaque blocage insère une règle de refus en tête de table. ufw refuse
//! `insert 1` quand sa table est vide : on installe alors une règle de refus
//! sur un port sans rapport avant de réessayer. Les règles peuvent aussi être
//! recopiées dans la chaîne DOCKER-USER, que les conteneurs publiés traversent
//! sans passer par ufw.

use super::{CommandRunner, ServiceLock};
use crate::models::Protocol;
use log::{debug, error, info};
use std::sync::Arc;

/// Port de la règle de remplissage (discard)
pub const PLACEHOLDER_PORT: u16 = 9;

/// Chaîne iptables réservée par Docker aux règles utilisateur
pub const CONTAINER_CHAIN: &str = "DOCKER-USER";

pub struct FirewallLock {
    port: u16,
    protocol: Protocol,
    container_mirror: bool,
    runner: Arc<dyn CommandRunner>,
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

impl FirewallLock {
    /// Active le pare-feu, échoue si ufw n'est pas utilisable
    pub fn new(
        port: u16,
        protocol: Protocol,
        container_mirror: bool,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, String> {
        if port == 0 {
            return Err("le port 0 ne peut pas être verrouillé".to_string());
        }
        if !runner.run("ufw", &args(&["--force", "enable"])) {
            return Err("impossible d'activer ufw (droits root requis)".to_string());
        }
        info!("Verrou pare-feu prêt pour le port {}/{}", port, protocol);

        Ok(Self {
            port,
            protocol,
            container_mirror,
            runner,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn rule(&self, action: &[&str], address: &str) -> Vec<String> {
        let port = self.port.to_string();
        let protocol = self.protocol.to_string();
        let mut rule = args(action);
        rule.extend(args(&["deny", "from", address, "to", "any", "port", &port, "proto", &protocol]));
        rule
    }

    fn insert_rule(&self, address: &str) -> bool {
        let rule = self.rule(&["insert", "1"], address);
        if self.runner.run("ufw", &rule) {
            return true;
        }

        debug!("Insertion en tête refusée, ajout d'une règle de remplissage");
        let placeholder = self.placeholder_rule();
        if !self.runner.run("ufw", &placeholder) {
            return false;
        }
        self.runner.run("ufw", &rule)
    }

    fn placeholder_rule(&self) -> Vec<String> {
        let port = PLACEHOLDER_PORT.to_string();
        let protocol = self.protocol.to_string();
        args(&["deny", "from", "any", "to", "any", "port", &port, "proto", &protocol])
    }

    fn delete_rule(&self, address: &str) -> bool {
        self.runner.run("ufw", &self.rule(&["delete"], address))
    }

    fn mirror(&self, address: &str, block: bool) -> bool {
        let port = self.port.to_string();
        let protocol = self.protocol.to_string();
        let flag = if block { "-I" } else { "-D" };
        let rule = args(&[
            flag,
            CONTAINER_CHAIN,
            "-s",
            address,
            "-p",
            &protocol,
            "--dport",
            &port,
            "-j",
            "DROP",
        ]);
        let ok = self.runner.run("iptables", &rule);
        if !ok {
            debug!("Règle {} non appliquée pour {} (Docker absent ?)", CONTAINER_CHAIN, address);
        }
        ok
    }

    fn apply(&self, addresses: &[String], block: bool) -> bool {
        let mut success = true;
        for address in addresses {
            let mut current = if block {
                self.insert_rule(address)
            } else {
                self.delete_rule(address)
            };
            if self.container_mirror {
                current |= self.mirror(address, block);
            }
            if !current {
                error!(
                    "Échec de la règle pare-feu pour {} sur le port {}",
                    address, self.port
                );
            }
            success &= current;
        }
        success
    }
}

impl ServiceLock for FirewallLock {
    fn block(&self, addresses: &[String]) -> bool {
        self.apply(addresses, true)
    }

    fn unblock(&self, addresses: &[String]) -> bool {
        self.apply(addresses, false)
    }
}
