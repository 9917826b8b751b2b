// Schema registry and resolver
//
// The registry maps names to schemas and remembers, per entry, whether the
// schema was registered as a default. Default resolution picks the first
// default entry (registration order) supporting a capability and memoizes the
// answer until the next enable/disable.
//
// Design: registration happens at startup. The lock only exists so a
// dispatcher can be shared across tasks; enable/disable while requests are in
// flight is the caller's problem.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::capability::Capability;
use crate::error::{KnockError, Result};
use crate::schema::{Schema, Verifier};

struct Entry {
    name: String,
    schema: Arc<Schema>,
    is_default: bool,
}

#[derive(Default)]
struct RegistryState {
    entries: Vec<Entry>,
    defaults: HashMap<Capability, Option<Arc<Schema>>>,
}

impl RegistryState {
    fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn first_default(&self, capability: Capability) -> Option<Arc<Schema>> {
        self.entries
            .iter()
            .find(|e| e.is_default && e.schema.supports(capability))
            .map(|e| e.schema.clone())
    }
}

/// Registry of named schemas
#[derive(Default)]
pub struct SchemaRegistry {
    state: RwLock<RegistryState>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema.
    ///
    /// The explicit `name` wins over the schema's own name. A schema with the
    /// same name is replaced in place. `verify` replaces the schema's
    /// verifier. Clears the default cache.
    pub fn enable(
        &self,
        name: Option<&str>,
        mut schema: Schema,
        set_default: bool,
        verify: Option<Arc<dyn Verifier>>,
    ) -> Result<()> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None if !schema.name().is_empty() => schema.name().to_string(),
            None => return Err(KnockError::MissingSchemaName),
        };

        schema.rename(&name);
        if let Some(verify) = verify {
            schema.set_verifier(verify);
        }

        tracing::info!(
            schema = %name,
            default = set_default,
            methods = ?schema.methods(),
            "Enabling schema"
        );

        let entry = Entry {
            name,
            schema: Arc::new(schema),
            is_default: set_default,
        };

        let mut state = self.state.write();
        match state.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => state.entries.push(entry),
        }
        state.defaults.clear();
        Ok(())
    }

    /// Remove a schema. Removing an unknown name is a no-op. Clears the default cache.
    pub fn disable(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(KnockError::MissingSchemaName);
        }

        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|e| e.name != name);
        if state.entries.len() < before {
            tracing::info!(schema = %name, "Disabled schema");
        }
        state.defaults.clear();
        Ok(())
    }

    /// True iff at least one registered schema implements knockLogin
    pub fn is_valid(&self) -> bool {
        self.state
            .read()
            .entries
            .iter()
            .any(|e| e.schema.supports(Capability::Login))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.state.read().find(name).map(|e| e.schema.clone())
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.state
            .read()
            .entries
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Pick the schema handling a request.
    ///
    /// An explicit name is looked up directly and, with a capability, only
    /// accepted when the schema supports it; it never falls back to a
    /// default. Without a name the memoized default for the capability is
    /// used.
    pub fn prefer_schema(
        &self,
        name: Option<&str>,
        capability: Option<Capability>,
    ) -> Option<Arc<Schema>> {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            let schema = self.get(name)?;
            return match capability {
                Some(capability) if !schema.supports(capability) => {
                    tracing::debug!(schema = %name, %capability, "Named schema lacks capability");
                    None
                }
                _ => Some(schema),
            };
        }

        capability.and_then(|capability| self.default_for(capability))
    }

    fn default_for(&self, capability: Capability) -> Option<Arc<Schema>> {
        if let Some(cached) = self.state.read().defaults.get(&capability) {
            return cached.clone();
        }

        // Miss: recheck under the upgradable guard, another task may have filled it
        let state = self.state.upgradable_read();
        if let Some(cached) = state.defaults.get(&capability) {
            return cached.clone();
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let schema = state.first_default(capability);
        tracing::debug!(
            %capability,
            schema = ?schema.as_ref().map(|s| s.name()),
            "Resolved default schema"
        );
        state.defaults.insert(capability, schema.clone());
        schema
    }

    #[cfg(test)]
    fn is_cached(&self, capability: Capability) -> bool {
        self.state.read().defaults.contains_key(&capability)
    }
}
