//! Politique de blocage : tentatives, blocages, règles statiques et expiration

use super::ProtectedService;
use crate::error::{Error, Result};
use crate::locks::{EnforcementLock, ServiceLock};
use crate::models::{ActionOutcome, BlockedRecord, LoginAttempt, StaticRule};
use crate::validation::canonical;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};

impl ProtectedService {
    /// Applique la décision au niveau du système
    ///
    /// Un service arrêté n'a pas de verrou construit : on en construit un
    /// le temps de l'action.
    fn enforce(&self, address: &str, block: bool) -> bool {
        let addresses = [address.to_string()];
        let apply = |lock: &EnforcementLock| {
            if block {
                lock.block(&addresses)
            } else {
                lock.unblock(&addresses)
            }
        };

        if let Some(lock) = &self.lock {
            return apply(lock);
        }
        match EnforcementLock::for_settings(&self.settings, &self.context.locks) {
            Ok(Some(lock)) => apply(&lock),
            Ok(None) => true,
            Err(e) => {
                error!("Verrou indisponible pour '{}': {}", self.settings.name, e);
                false
            }
        }
    }

    /// Enregistre une tentative échouée et bloque l'adresse si le seuil est atteint
    ///
    /// Retourne `Unchanged` tant que le seuil n'est pas atteint, sinon le
    /// résultat du blocage.
    pub fn log_attempt(&mut self, address: &str, now: DateTime<Utc>) -> Result<ActionOutcome> {
        let Some(address) = canonical(address) else {
            warn!("Tentative ignorée, adresse invalide: {:?}", address);
            return Ok(ActionOutcome::Invalid);
        };

        self.store().record_attempt(LoginAttempt {
            service_id: self.settings.id,
            address: address.clone(),
            timestamp: now,
        })?;
        self.after_attempt(&address, now)
    }

    /// Enregistre toutes les tentatives d'une passe en une seule écriture,
    /// puis applique le seuil une fois par adresse distincte
    ///
    /// Retourne le nombre d'adresses nouvellement bloquées.
    pub fn log_attempts(&mut self, addresses: &[String], now: DateTime<Utc>) -> Result<usize> {
        let mut attempts = Vec::with_capacity(addresses.len());
        let mut distinct: Vec<String> = Vec::new();
        for raw in addresses {
            let Some(address) = canonical(raw) else {
                warn!("Tentative ignorée, adresse invalide: {:?}", raw);
                continue;
            };
            attempts.push(LoginAttempt {
                service_id: self.settings.id,
                address: address.clone(),
                timestamp: now,
            });
            if !distinct.contains(&address) {
                distinct.push(address);
            }
        }
        self.store().record_attempts(attempts)?;

        let mut applied = 0;
        for address in distinct {
            if self.after_attempt(&address, now)? == ActionOutcome::Applied {
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn after_attempt(&mut self, address: &str, now: DateTime<Utc>) -> Result<ActionOutcome> {
        debug!("Tentative échouée de {} sur '{}'", address, self.settings.name);
        if self.is_blocked(address)? {
            warn!(
                "Tentative de connexion de {} sur '{}' alors qu'elle est bloquée",
                address, self.settings.name
            );
        }

        if self.has_exceeded_attempts(address, now)? {
            return self.block(address, now);
        }
        Ok(ActionOutcome::Unchanged)
    }

    /// Nombre de tentatives dans la fenêtre glissante >= maximum autorisé
    pub fn has_exceeded_attempts(&self, address: &str, now: DateTime<Utc>) -> Result<bool> {
        let since = now - Duration::minutes(i64::from(self.settings.time_threshold));
        let count = self
            .store()
            .count_attempts_since(self.settings.id, address, since)?;
        Ok(count >= self.settings.max_attempts as usize)
    }

    pub fn block(&mut self, address: &str, now: DateTime<Utc>) -> Result<ActionOutcome> {
        let Some(address) = canonical(address) else {
            warn!("Blocage ignoré, adresse invalide: {:?}", address);
            return Ok(ActionOutcome::Invalid);
        };
        let id = self.settings.id;

        if let Some(rule) = self.store().static_rule(id, &address)? {
            warn!(
                "{} est en {} de '{}', blocage refusé",
                address,
                rule.list(),
                self.settings.name
            );
            return Ok(ActionOutcome::Conflict(rule.list()));
        }

        if self.store().active_block(id, &address)?.is_some() {
            self.store().touch_block(id, &address, now)?;
            info!(
                "{} déjà bloquée sur '{}', délai relancé",
                address, self.settings.name
            );
            return Ok(ActionOutcome::Refreshed);
        }

        if !self.enforce(&address, true) {
            error!(
                "Échec du blocage de {} sur '{}'",
                address, self.settings.name
            );
            return Ok(ActionOutcome::Failed);
        }

        self.store().insert_block(BlockedRecord {
            service_id: id,
            address: address.clone(),
            blocked_at: now,
            active: true,
        })?;
        info!("{} bloquée sur '{}'", address, self.settings.name);
        self.context.events.log_block(&self.settings.name, &address);
        Ok(ActionOutcome::Applied)
    }

    pub fn unblock(&mut self, address: &str) -> Result<ActionOutcome> {
        let Some(address) = canonical(address) else {
            warn!("Déblocage ignoré, adresse invalide: {:?}", address);
            return Ok(ActionOutcome::Invalid);
        };
        let id = self.settings.id;

        if let Some(rule) = self.store().static_rule(id, &address)? {
            warn!(
                "{} est en {} de '{}', déblocage refusé",
                address,
                rule.list(),
                self.settings.name
            );
            return Ok(ActionOutcome::Conflict(rule.list()));
        }

        if self.store().active_block(id, &address)?.is_none() {
            info!("{} n'est pas bloquée sur '{}'", address, self.settings.name);
            return Ok(ActionOutcome::Unchanged);
        }

        if !self.enforce(&address, false) {
            error!(
                "Échec du déblocage de {} sur '{}'",
                address, self.settings.name
            );
            return Ok(ActionOutcome::Failed);
        }

        self.store().deactivate_blocks(id, &address)?;
        info!("{} débloquée sur '{}'", address, self.settings.name);
        self.context.events.log_unblock(&self.settings.name, &address);
        Ok(ActionOutcome::Applied)
    }

    /// Une règle statique l'emporte sur l'état dynamique
    pub fn is_blocked(&self, address: &str) -> Result<bool> {
        let Some(address) = canonical(address) else {
            return Ok(false);
        };
        if let Some(rule) = self.store().static_rule(self.settings.id, &address)? {
            return Ok(rule.blocked);
        }
        Ok(self
            .store()
            .active_block(self.settings.id, &address)?
            .is_some())
    }

    pub fn static_rule(&self, address: &str) -> Result<Option<StaticRule>> {
        let address =
            canonical(address).ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
        Ok(self.store().static_rule(self.settings.id, &address)?)
    }

    /// Ajoute l'adresse en liste noire (`blocked`) ou blanche
    ///
    /// Le système est d'abord mis en accord avec la nouvelle règle, puis le
    /// blocage dynamique éventuel est clos : la règle devient la seule
    /// référence pour cette adresse.
    pub fn create_static_rule(
        &mut self,
        address: &str,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome> {
        let address =
            canonical(address).ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
        let id = self.settings.id;

        let dynamic = self.store().active_block(id, &address)?.is_some();
        let enforced = match self.store().static_rule(id, &address)? {
            Some(rule) => rule.blocked,
            None => dynamic,
        };

        if enforced != blocked && !self.enforce(&address, blocked) {
            error!(
                "Impossible d'appliquer la règle statique pour {} sur '{}'",
                address, self.settings.name
            );
            return Ok(ActionOutcome::Failed);
        }

        if dynamic {
            self.store().deactivate_blocks(id, &address)?;
        }
        let rule = StaticRule {
            service_id: id,
            address: address.clone(),
            added_at: now,
            blocked,
        };
        info!(
            "{} ajoutée en {} de '{}'",
            address,
            rule.list(),
            self.settings.name
        );
        self.store().upsert_static_rule(rule)?;
        self.context
            .events
            .log_static_rule(&self.settings.name, &address, blocked);
        Ok(ActionOutcome::Applied)
    }

    /// Retire la règle ; une adresse en liste noire est aussi débloquée
    pub fn remove_static_rule(&mut self, address: &str) -> Result<ActionOutcome> {
        let address =
            canonical(address).ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
        let id = self.settings.id;

        let Some(rule) = self.store().static_rule(id, &address)? else {
            info!("Aucune règle statique pour {} sur '{}'", address, self.settings.name);
            return Ok(ActionOutcome::Unchanged);
        };

        if rule.blocked && !self.enforce(&address, false) {
            error!(
                "Impossible de lever la liste noire de {} sur '{}'",
                address, self.settings.name
            );
            return Ok(ActionOutcome::Failed);
        }

        self.store().remove_static_rule(id, &address)?;
        info!(
            "{} retirée de la {} de '{}'",
            address,
            rule.list(),
            self.settings.name
        );
        Ok(ActionOutcome::Applied)
    }

    /// Purge les tentatives hors fenêtre puis débloque les blocages expirés
    ///
    /// Retourne le nombre d'adresses débloquées.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let id = self.settings.id;
        let window = now - Duration::minutes(i64::from(self.settings.time_threshold));
        let pruned = self.store().prune_attempts(id, window)?;
        if pruned > 0 {
            debug!("{} tentative(s) purgée(s) pour '{}'", pruned, self.settings.name);
        }

        let Some(duration) = self.settings.block_duration else {
            return Ok(0);
        };
        let expired = self
            .store()
            .expired_blocks(id, now - Duration::minutes(i64::from(duration)))?;

        let mut released = 0;
        for address in expired {
            match self.unblock(&address)? {
                ActionOutcome::Applied => released += 1,
                ActionOutcome::Conflict(_) => {
                    // La règle statique a pris le relais
                    self.store().deactivate_blocks(id, &address)?;
                }
                _ => {}
            }
        }
        if released > 0 {
            info!(
                "{} adresse(s) débloquée(s) après expiration sur '{}'",
                released, self.settings.name
            );
        }
        Ok(released)
    }
}
