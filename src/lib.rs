pub mod config;
pub mod logic;
pub mod model;
pub mod store;

// Export logic types
pub use logic::{
    app_registry, new_registry, ContainerError, DataContainer, FieldForm, FormData, FormOpts,
    MultiForm, MultiFormDef, MultiFormSet, MultiFormSetDef, NamespaceEntry, NamespaceLookup,
    NamespaceRegistry, Namespaces, RegistryError, RegistrySnapshot, SharedRegistry,
    ValidationErrors,
    NON_FIELD_ERRORS,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{BlobField, MemoryStore, RecordStore};
