use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::logic::registry::SharedRegistry;
use crate::model::{FieldDef, FormSchema};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
}

/// A namespace schema declared in configuration rather than in code. Loaded
/// schemas are seeded into a registry at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub namespace: String,
    /// Record type the schema is scoped to; absent means globally registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Add environment variables with prefix "APPDATA_"
        config = config.add_source(
            config::Environment::with_prefix("APPDATA")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Register every configured namespace schema. Existing registrations are
    /// not overridden; a conflict with code-level registration is an error.
    pub fn apply(&self, registry: &SharedRegistry) -> anyhow::Result<()> {
        let mut registry = registry.write();
        for ns in &self.namespaces {
            let schema = Arc::new(FormSchema::new(&ns.namespace, ns.fields.clone()));
            registry.register(&ns.namespace, schema, ns.record_type.as_deref(), false)?;
            log::info!(
                "registered namespace '{}' from configuration{}",
                ns.namespace,
                ns.record_type
                    .as_deref()
                    .map(|t| format!(" for record type '{}'", t))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }
}
