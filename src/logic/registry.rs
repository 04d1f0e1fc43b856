use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::model::{FormSchema, Id, RecordType};

/// Configuration-time registration failures. These indicate programmer or
/// setup mistakes and are expected to abort startup, never a request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("namespace '{namespace}' already assigned to schema '{schema}'{}", scope_suffix(record_type))]
    NamespaceConflict {
        namespace: String,
        schema: String,
        record_type: Option<String>,
    },
    #[error("namespace '{0}' is not registered yet")]
    NamespaceMissing(String),
}

fn scope_suffix(record_type: &Option<String>) -> String {
    match record_type {
        Some(t) => format!(" for record type '{}'", t),
        None => String::new(),
    }
}

/// Registry of namespace schemas: which schema applies to which namespace,
/// globally or for a specific record type. Mutated at application
/// initialization, read for the rest of the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    /// Fallback schema for namespaces with no registration at all.
    pub default_class: Option<Arc<FormSchema>>,
    global: HashMap<String, Arc<FormSchema>>,
    per_type: HashMap<Id, HashMap<String, Arc<FormSchema>>>,
}

/// Point-in-time copy of a registry's state, used by tests to restore the
/// shared registry after mutating it.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot(NamespaceRegistry);

impl NamespaceRegistry {
    pub fn new(default_class: Option<Arc<FormSchema>>) -> Self {
        Self {
            default_class,
            global: HashMap::new(),
            per_type: HashMap::new(),
        }
    }

    /// Register `schema` under `namespace`, globally or for one record type.
    /// A namespace maps to exactly one schema per registry; re-registration
    /// without `override_existing` is a conflict.
    pub fn register(
        &mut self,
        namespace: &str,
        schema: Arc<FormSchema>,
        record_type: Option<&str>,
        override_existing: bool,
    ) -> Result<(), RegistryError> {
        let registry = match record_type {
            Some(t) => self.per_type.entry(t.to_string()).or_default(),
            None => &mut self.global,
        };
        if let Some(existing) = registry.get(namespace) {
            if !override_existing {
                return Err(RegistryError::NamespaceConflict {
                    namespace: namespace.to_string(),
                    schema: existing.name.clone(),
                    record_type: record_type.map(|t| t.to_string()),
                });
            }
        }
        log::debug!(
            "registering namespace '{}' ({})",
            namespace,
            record_type.unwrap_or("global")
        );
        registry.insert(namespace.to_string(), schema);
        Ok(())
    }

    pub fn unregister(
        &mut self,
        namespace: &str,
        record_type: Option<&str>,
    ) -> Result<(), RegistryError> {
        let registry = match record_type {
            Some(t) => self
                .per_type
                .get_mut(t)
                .ok_or_else(|| RegistryError::NamespaceMissing(namespace.to_string()))?,
            None => &mut self.global,
        };
        registry
            .remove(namespace)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NamespaceMissing(namespace.to_string()))
    }

    /// Schema for `namespace` as seen by `record_type`: the type's own
    /// registrations first, then its ancestors in order, then the global
    /// registry, then the default. Never fails; a total miss is `None` when
    /// no default is set.
    pub fn get_class(
        &self,
        namespace: &str,
        record_type: &RecordType,
    ) -> Option<Arc<FormSchema>> {
        for type_name in record_type.mro() {
            if let Some(schema) = self
                .per_type
                .get(type_name)
                .and_then(|registry| registry.get(namespace))
            {
                return Some(schema.clone());
            }
        }
        if let Some(schema) = self.global.get(namespace) {
            return Some(schema.clone());
        }
        self.default_class.clone()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(self.clone())
    }

    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        *self = snapshot.0;
    }
}

/// Shared handle to a registry. Containers hold one of these so namespace
/// lookups always see current registrations.
pub type SharedRegistry = Arc<RwLock<NamespaceRegistry>>;

pub fn new_registry(default_class: Option<Arc<FormSchema>>) -> SharedRegistry {
    Arc::new(RwLock::new(NamespaceRegistry::new(default_class)))
}

static APP_REGISTRY: OnceLock<SharedRegistry> = OnceLock::new();

/// The process-wide registry most applications register into at startup.
/// Record types that want isolation construct their own registry with
/// [`new_registry`] instead.
pub fn app_registry() -> SharedRegistry {
    APP_REGISTRY.get_or_init(|| new_registry(None)).clone()
}
