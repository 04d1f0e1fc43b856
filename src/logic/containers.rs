use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::logic::forms::{FieldForm, FormData, ValidationErrors};
use crate::logic::registry::SharedRegistry;
use crate::model::field::prepare_json;
use crate::model::{FieldValue, FormSchema, RecordType};

/// Container access failures. `MissingKey` on an optional lookup means the
/// caller should have used `get_or`; the rest indicate configuration or
/// stored-data mistakes and are allowed to propagate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContainerError {
    #[error("key '{0}' not found")]
    MissingKey(String),
    #[error("no schema registered for namespace '{0}'")]
    NotRegistered(String),
    #[error("namespace '{0}' holds a non-mapping value")]
    NotAMapping(String),
    #[error("invalid stored value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Wraps the raw mapping for one namespace. Reads clean values through the
/// schema lazily and cache them; writes land in the clean cache (declared
/// fields) or directly in the raw mapping (undeclared keys). Nothing is
/// re-serialized until `serialize` pushes the cache back into raw form.
#[derive(Debug, Clone)]
pub struct DataContainer {
    schema: Arc<FormSchema>,
    raw: Map<String, Value>,
    cleaned: HashMap<String, FieldValue>,
    accessed: bool,
}

impl DataContainer {
    pub fn new(schema: Arc<FormSchema>) -> Self {
        Self::from_raw(schema, Map::new())
    }

    pub fn from_raw(schema: Arc<FormSchema>, raw: Map<String, Value>) -> Self {
        Self {
            schema,
            raw,
            cleaned: HashMap::new(),
            accessed: false,
        }
    }

    pub fn schema(&self) -> &Arc<FormSchema> {
        &self.schema
    }

    /// Whether any read or write has touched this namespace. Untouched
    /// containers are skipped by validation and round-trip their raw data
    /// unchanged.
    pub fn accessed(&self) -> bool {
        self.accessed
    }

    /// Read a value. Declared fields are cleaned on first read and cached;
    /// a declared field that was never written yields its cleaned initial
    /// value. Undeclared keys fall back to the raw mapping.
    pub fn get(&mut self, name: &str) -> Result<FieldValue, ContainerError> {
        self.accessed = true;

        if let Some(field) = self.schema.get_field(name) {
            if !self.cleaned.contains_key(name) {
                let value = match self.raw.get(name) {
                    Some(raw) => field.to_native(raw).map_err(|message| {
                        ContainerError::InvalidValue {
                            field: name.to_string(),
                            message,
                        }
                    })?,
                    None => field.initial_value(),
                };
                self.cleaned.insert(name.to_string(), value);
            }
            return Ok(self.cleaned[name].clone());
        }

        match self.raw.get(name) {
            Some(raw) => Ok(FieldValue::from_json(raw.clone())),
            None => Err(ContainerError::MissingKey(name.to_string())),
        }
    }

    /// `get` with a fallback instead of a `MissingKey` failure. Only the
    /// absent case maps to the default; an invalid stored value still fails.
    /// Declared fields never miss (they have an initial), so the default
    /// only applies to undeclared keys.
    pub fn get_or(
        &mut self,
        name: &str,
        default: FieldValue,
    ) -> Result<FieldValue, ContainerError> {
        match self.get(name) {
            Ok(value) => Ok(value),
            Err(ContainerError::MissingKey(_)) => Ok(default),
            Err(err) => Err(err),
        }
    }

    /// Write a value. Declared fields keep the typed value in the clean
    /// cache, unserialized; undeclared keys go straight to the raw mapping.
    pub fn set(&mut self, name: &str, value: FieldValue) {
        self.accessed = true;
        if self.schema.has_field(name) {
            self.cleaned.insert(name.to_string(), value);
        } else {
            self.raw.insert(name.to_string(), prepare_json(&value));
        }
    }

    pub fn remove(&mut self, name: &str) -> Result<(), ContainerError> {
        self.accessed = true;
        let in_cache = self.cleaned.remove(name).is_some();
        let in_raw = self.raw.remove(name).is_some();
        if in_cache || in_raw {
            Ok(())
        } else {
            Err(ContainerError::MissingKey(name.to_string()))
        }
    }

    /// Bulk write, the form-save path.
    pub fn update<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        for (name, value) in values {
            self.set(&name, value);
        }
    }

    /// All keys visible through this container: cached cleaned fields plus
    /// raw entries.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cleaned.keys().cloned().collect();
        for key in self.raw.keys() {
            if !self.cleaned.contains_key(key) {
                names.push(key.clone());
            }
        }
        names.sort();
        names
    }

    /// The serialized form without mutating the container: raw data overlaid
    /// with the prepared clean cache. The clean cache stays authoritative
    /// for any field it holds.
    pub fn serialized_view(&self) -> Map<String, Value> {
        let mut out = self.raw.clone();
        for (name, value) in &self.cleaned {
            // only declared fields ever enter the clean cache
            if let Some(field) = self.schema.get_field(name) {
                out.insert(name.clone(), field.prepare_value(value));
            }
        }
        out
    }

    /// Push prepared cleaned values back into the raw mapping and return it.
    /// Idempotent: serializing twice with no writes in between yields the
    /// same mapping.
    pub fn serialize(&mut self) -> &Map<String, Value> {
        self.raw = self.serialized_view();
        &self.raw
    }

    /// The raw mapping as last loaded or serialized, with no cache applied.
    pub fn raw_snapshot(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Serialize, then run a throwaway bound form over the raw mapping and
    /// collect its field errors.
    pub fn validate(&mut self) -> Result<(), ValidationErrors> {
        self.serialize();
        let data: FormData = self
            .raw
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut form = self.get_form(Some(data), None, None, &[]);
        if form.is_valid() {
            Ok(())
        } else {
            Err(form.errors())
        }
    }

    /// Build a schema-bound form whose initial values come from the
    /// serialized data, restricted to `fields` when given and always
    /// excluding `exclude`.
    pub fn get_form(
        &mut self,
        data: Option<FormData>,
        prefix: Option<&str>,
        fields: Option<&[String]>,
        exclude: &[String],
    ) -> FieldForm {
        let initial = self.serialize().clone();
        let selected: Vec<_> = self
            .schema
            .fields
            .iter()
            .filter(|f| fields.map_or(true, |allowed| allowed.iter().any(|a| a == &f.name)))
            .filter(|f| !exclude.iter().any(|e| e == &f.name))
            .cloned()
            .collect();
        FieldForm::new(selected, data, prefix.map(|p| p.to_string()), initial)
    }
}

/// Two containers are equal iff their serialized forms are equal.
impl PartialEq for DataContainer {
    fn eq(&self, other: &Self) -> bool {
        self.serialized_view() == other.serialized_view()
    }
}

impl PartialEq<Map<String, Value>> for DataContainer {
    fn eq(&self, other: &Map<String, Value>) -> bool {
        &self.serialized_view() == other
    }
}

impl PartialEq<Value> for DataContainer {
    fn eq(&self, other: &Value) -> bool {
        match other {
            Value::Object(map) => self == map,
            _ => false,
        }
    }
}

/// One slot of the per-record container: raw data that has never been
/// accessed through a schema, or a live typed container.
#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceEntry {
    Raw(Value),
    Data(DataContainer),
}

impl NamespaceEntry {
    pub fn as_data(&self) -> Option<&DataContainer> {
        match self {
            NamespaceEntry::Data(container) => Some(container),
            NamespaceEntry::Raw(_) => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataContainer> {
        match self {
            NamespaceEntry::Data(container) => Some(container),
            NamespaceEntry::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            NamespaceEntry::Raw(value) => Some(value),
            NamespaceEntry::Data(_) => None,
        }
    }
}

/// Result of an optional namespace lookup. A stored namespace comes back as
/// the live entry, so writes through it land on the record; a miss yields an
/// owned default that is never stored.
#[derive(Debug)]
pub enum NamespaceLookup<'a> {
    Stored(&'a mut NamespaceEntry),
    Default(NamespaceEntry),
}

impl Deref for NamespaceLookup<'_> {
    type Target = NamespaceEntry;

    fn deref(&self) -> &NamespaceEntry {
        match self {
            NamespaceLookup::Stored(entry) => entry,
            NamespaceLookup::Default(entry) => entry,
        }
    }
}

impl DerefMut for NamespaceLookup<'_> {
    fn deref_mut(&mut self) -> &mut NamespaceEntry {
        match self {
            NamespaceLookup::Stored(entry) => entry,
            NamespaceLookup::Default(entry) => entry,
        }
    }
}

/// Per-record-instance mapping from namespace name to that namespace's data.
/// Entries stay raw until first typed access; the registry decides which
/// schema (if any) wraps a namespace for this record's type.
#[derive(Debug)]
pub struct Namespaces {
    record_type: RecordType,
    registry: SharedRegistry,
    entries: HashMap<String, NamespaceEntry>,
}

impl Namespaces {
    pub fn new(record_type: RecordType, registry: SharedRegistry) -> Self {
        Self {
            record_type,
            registry,
            entries: HashMap::new(),
        }
    }

    /// Wrap a deserialized blob mapping. Values stay raw until accessed.
    pub fn from_raw(
        record_type: RecordType,
        registry: SharedRegistry,
        data: Map<String, Value>,
    ) -> Self {
        let entries = data
            .into_iter()
            .map(|(name, value)| (name, NamespaceEntry::Raw(value)))
            .collect();
        Self {
            record_type,
            registry,
            entries,
        }
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    fn lookup_schema(&self, name: &str) -> Option<Arc<FormSchema>> {
        self.registry.read().get_class(name, &self.record_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Access a namespace slot. A stored typed container is returned as-is
    /// (identity-stable); stored raw data is upgraded in place when a schema
    /// is registered; an absent namespace with a registered schema gets a
    /// fresh empty container stored under it. An absent namespace with no
    /// schema is a `MissingKey`.
    ///
    /// A slot that already holds a typed container keeps its schema even if
    /// the registry has since changed; late re-registration never silently
    /// re-wraps live typed state.
    pub fn entry(&mut self, name: &str) -> Result<&mut NamespaceEntry, ContainerError> {
        let schema = self.lookup_schema(name);
        let stored_raw = matches!(self.entries.get(name), Some(NamespaceEntry::Raw(_)));

        if stored_raw {
            if let Some(schema) = schema {
                let raw = match self.entries.remove(name) {
                    Some(NamespaceEntry::Raw(Value::Object(map))) => map,
                    Some(other) => {
                        // put it back untouched
                        self.entries.insert(name.to_string(), other);
                        return Err(ContainerError::NotAMapping(name.to_string()));
                    }
                    _ => unreachable!(),
                };
                self.entries.insert(
                    name.to_string(),
                    NamespaceEntry::Data(DataContainer::from_raw(schema, raw)),
                );
            }
        } else if !self.entries.contains_key(name) {
            match schema {
                Some(schema) => {
                    self.entries.insert(
                        name.to_string(),
                        NamespaceEntry::Data(DataContainer::new(schema)),
                    );
                }
                None => return Err(ContainerError::MissingKey(name.to_string())),
            }
        }

        Ok(self.entries.get_mut(name).expect("entry just ensured"))
    }

    /// Typed access to a namespace with a registered schema.
    pub fn namespace(&mut self, name: &str) -> Result<&mut DataContainer, ContainerError> {
        match self.entry(name)? {
            NamespaceEntry::Data(container) => Ok(container),
            NamespaceEntry::Raw(_) => Err(ContainerError::NotRegistered(name.to_string())),
        }
    }

    /// Like `entry` but yields the `default` instead of failing on a missing
    /// namespace. A stored namespace is handed back live, so writes through
    /// the result persist on the record; the default is wrapped in a data
    /// container when a schema is registered and is never stored.
    pub fn get_or(
        &mut self,
        name: &str,
        default: Value,
    ) -> Result<NamespaceLookup<'_>, ContainerError> {
        if self.entries.contains_key(name) {
            return self.entry(name).map(NamespaceLookup::Stored);
        }
        match self.lookup_schema(name) {
            Some(schema) => match default {
                Value::Object(map) => Ok(NamespaceLookup::Default(NamespaceEntry::Data(
                    DataContainer::from_raw(schema, map),
                ))),
                _ => Err(ContainerError::NotAMapping(name.to_string())),
            },
            None => Ok(NamespaceLookup::Default(NamespaceEntry::Raw(default))),
        }
    }

    /// Store a value under a namespace. The value is copied and wrapped in
    /// the registered schema's container when there is one, stored verbatim
    /// otherwise. Namespace data is never shared by reference across
    /// records.
    pub fn insert(&mut self, name: &str, value: Value) -> Result<(), ContainerError> {
        let entry = match self.lookup_schema(name) {
            Some(schema) => match value {
                Value::Object(map) => NamespaceEntry::Data(DataContainer::from_raw(schema, map)),
                _ => return Err(ContainerError::NotAMapping(name.to_string())),
            },
            None => NamespaceEntry::Raw(value),
        };
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<NamespaceEntry> {
        self.entries.remove(name)
    }

    /// Current value of a namespace in storage form, without upgrading or
    /// marking anything accessed.
    pub fn get_raw(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(|entry| match entry {
            NamespaceEntry::Raw(value) => value.clone(),
            NamespaceEntry::Data(container) => Value::Object(if container.accessed() {
                container.serialized_view()
            } else {
                container.raw_snapshot().clone()
            }),
        })
    }

    /// Validate every accessed typed namespace. Errors come back keyed by
    /// namespace, each entry holding that namespace's field errors; the
    /// composite form layer flattens these to dotted keys when it needs a
    /// single error set. Raw and untouched entries are skipped.
    pub fn validate(&mut self) -> Result<(), BTreeMap<String, ValidationErrors>> {
        let mut errors = BTreeMap::new();
        for (name, entry) in self.entries.iter_mut() {
            if let NamespaceEntry::Data(container) = entry {
                if container.accessed() {
                    if let Err(container_errors) = container.validate() {
                        errors.insert(name.clone(), container_errors);
                    }
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Serialize every namespace to the plain mapping that gets written to
    /// storage. Accessed containers serialize through their schema;
    /// untouched containers and raw entries reproduce their stored form
    /// unchanged. Returns a fresh map, never the live container.
    pub fn serialize(&mut self) -> Map<String, Value> {
        let mut out = Map::new();
        for (name, entry) in self.entries.iter_mut() {
            let value = match entry {
                NamespaceEntry::Raw(value) => value.clone(),
                NamespaceEntry::Data(container) => Value::Object(if container.accessed() {
                    container.serialize().clone()
                } else {
                    container.raw_snapshot().clone()
                }),
            };
            out.insert(name.clone(), value);
        }
        out
    }
}
