//! Registered health checks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::check::{HealthCheck, HealthCheckDefinition};
use crate::error::{HealthError, HealthResult};

/// A definition paired with the check body that implements it.
#[derive(Clone)]
pub struct RegisteredCheck {
    pub definition: HealthCheckDefinition,
    pub check: Arc<dyn HealthCheck>,
}

impl RegisteredCheck {
    /// Unique check name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl std::fmt::Debug for RegisteredCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredCheck")
            .field("name", &self.definition.name)
            .field("enabled", &self.definition.enabled)
            .field("check", &self.check.description())
            .finish()
    }
}

/// Storage and lookup of registered checks.
#[derive(Default)]
pub struct CheckRegistry {
    checks: DashMap<String, RegisteredCheck>,
}

impl CheckRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check. Names are unique.
    pub fn register(
        &self,
        definition: HealthCheckDefinition,
        check: Arc<dyn HealthCheck>,
    ) -> HealthResult<()> {
        definition.validate()?;

        match self.checks.entry(definition.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(HealthError::CheckAlreadyRegistered(definition.name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(check = %definition.name, category = %definition.category, "Registered health check");
                slot.insert(RegisteredCheck { definition, check });
                Ok(())
            }
        }
    }

    /// Remove a check, returning it.
    pub fn unregister(&self, name: &str) -> HealthResult<RegisteredCheck> {
        self.checks
            .remove(name)
            .map(|(_, check)| check)
            .ok_or_else(|| HealthError::CheckNotFound(name.to_string()))
    }

    /// Look up a check by name.
    pub fn get(&self, name: &str) -> Option<RegisteredCheck> {
        self.checks.get(name).map(|entry| entry.clone())
    }

    /// Is a check with this name registered?
    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Toggle the only mutable part of a definition. Returns the previous value.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> HealthResult<bool> {
        let mut entry = self
            .checks
            .get_mut(name)
            .ok_or_else(|| HealthError::CheckNotFound(name.to_string()))?;
        Ok(std::mem::replace(&mut entry.definition.enabled, enabled))
    }

    /// Enabled checks sorted by name.
    pub fn enabled_checks(&self) -> Vec<RegisteredCheck> {
        let mut checks: Vec<RegisteredCheck> = self
            .checks
            .iter()
            .filter(|entry| entry.definition.enabled)
            .map(|entry| entry.clone())
            .collect();
        checks.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        checks
    }

    /// All definitions sorted by name.
    pub fn definitions(&self) -> Vec<HealthCheckDefinition> {
        let mut definitions: Vec<HealthCheckDefinition> = self
            .checks
            .iter()
            .map(|entry| entry.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.checks.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// Split checks into waves so that every check runs after the
/// dependencies it shares a batch with.
///
/// Dependencies outside the batch impose no ordering. Checks caught in a
/// dependency cycle end up together in a final wave.
pub fn execution_waves(checks: Vec<RegisteredCheck>) -> Vec<Vec<RegisteredCheck>> {
    let names: HashSet<String> = checks.iter().map(|c| c.definition.name.clone()).collect();
    let mut pending: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for check in &checks {
        let inside: HashSet<&String> = check
            .definition
            .dependencies
            .iter()
            .filter(|dep| names.contains(*dep))
            .collect();
        pending.insert(check.definition.name.clone(), inside.len());
        for dep in inside {
            dependents
                .entry(dep.clone())
                .or_default()
                .push(check.definition.name.clone());
        }
    }

    let mut remaining: HashMap<String, RegisteredCheck> = checks
        .into_iter()
        .map(|c| (c.definition.name.clone(), c))
        .collect();
    let mut waves = Vec::new();

    loop {
        let mut ready: Vec<String> = pending
            .iter()
            .filter(|(name, count)| **count == 0 && remaining.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect();
        if ready.is_empty() {
            break;
        }
        ready.sort();

        for name in &ready {
            pending.remove(name);
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }

        waves.push(
            ready
                .iter()
                .filter_map(|name| remaining.remove(name))
                .collect(),
        );
    }

    if !remaining.is_empty() {
        let mut cyclic: Vec<RegisteredCheck> = remaining.into_values().collect();
        cyclic.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        waves.push(cyclic);
    }

    waves
}
