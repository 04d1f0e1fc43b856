use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::logic::containers::DataContainer;
use crate::logic::registry::SharedRegistry;
use crate::model::{pretty_name, FieldDef, FieldValue, Record, RecordMeta};
use crate::store::traits::RecordStore;

/// Shared key for errors not attributable to a single field. Non-field
/// errors from every sub-form of a composite are concatenated under it.
pub const NON_FIELD_ERRORS: &str = "__all__";

/// Submitted form data: flat mapping from (possibly prefixed) field name to
/// raw JSON value, the way a request layer would hand it over.
pub type FormData = HashMap<String, Value>;

/// Aggregate, field-keyed validation errors. The only error category
/// expected during normal request handling; always recoverable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, thiserror::Error)]
#[error("validation failed: {}", self.render())]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, message: &str) {
        self.errors
            .entry(key.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// Fold another error set in under `"<prefix>.<field>"` keys. Non-field
    /// errors keep the shared key and are concatenated, never overwritten.
    pub fn extend_prefixed(&mut self, prefix: &str, other: ValidationErrors) {
        for (key, messages) in other.errors {
            let target = if key == NON_FIELD_ERRORS {
                key
            } else {
                format!("{}.{}", prefix, key)
            };
            self.errors.entry(target).or_default().extend(messages);
        }
    }

    /// Fold another error set in under its own keys.
    pub fn merge(&mut self, other: ValidationErrors) {
        for (key, messages) in other.errors {
            self.errors.entry(key).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Vec<String>> {
        self.errors.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Vec<String>)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn non_field_errors(&self) -> &[String] {
        self.errors
            .get(NON_FIELD_ERRORS)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn render(&self) -> String {
        self.errors
            .iter()
            .map(|(key, messages)| format!("{}: {}", key, messages.iter().join("; ")))
            .join(", ")
    }
}

#[derive(Debug, Clone)]
struct FormOutcome {
    cleaned: HashMap<String, FieldValue>,
    errors: ValidationErrors,
}

/// A form over one field set: the record's own base fields, or one
/// namespace's schema restricted per configuration. Bound forms clean their
/// submitted data once and cache the outcome; unbound forms are display-only
/// and never valid.
#[derive(Debug, Clone)]
pub struct FieldForm {
    fields: Vec<FieldDef>,
    prefix: Option<String>,
    initial: Map<String, Value>,
    data: Option<FormData>,
    outcome: Option<FormOutcome>,
}

impl FieldForm {
    pub fn new(
        fields: Vec<FieldDef>,
        data: Option<FormData>,
        prefix: Option<String>,
        initial: Map<String, Value>,
    ) -> Self {
        Self {
            fields,
            prefix,
            initial,
            data,
            outcome: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Submitted-data key for a field, composed with the form prefix.
    pub fn add_prefix(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}-{}", prefix, name),
            None => name.to_string(),
        }
    }

    fn full_clean(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let data = match &self.data {
            Some(data) => data,
            None => return,
        };

        let mut cleaned = HashMap::new();
        let mut errors = ValidationErrors::new();
        for field in &self.fields {
            let raw = data
                .get(&self.add_prefix(&field.name))
                .cloned()
                .unwrap_or(Value::Null);
            match field.clean(&raw) {
                Ok(value) => {
                    cleaned.insert(field.name.clone(), value);
                }
                Err(message) => errors.add(&field.name, &message),
            }
        }
        self.outcome = Some(FormOutcome { cleaned, errors });
    }

    pub fn is_valid(&mut self) -> bool {
        self.full_clean();
        self.outcome
            .as_ref()
            .map_or(false, |outcome| outcome.errors.is_empty())
    }

    pub fn errors(&mut self) -> ValidationErrors {
        self.full_clean();
        self.outcome
            .as_ref()
            .map(|outcome| outcome.errors.clone())
            .unwrap_or_default()
    }

    /// Cleaned values, available once the form validated successfully.
    pub fn cleaned_data(&mut self) -> Option<&HashMap<String, FieldValue>> {
        if self.is_valid() {
            self.outcome.as_ref().map(|outcome| &outcome.cleaned)
        } else {
            None
        }
    }

    /// Names of fields whose submitted value differs from the bound initial.
    /// A field with no submitted key at all counts as unchanged.
    pub fn changed_data(&mut self) -> Vec<String> {
        self.full_clean();
        let data = match &self.data {
            Some(data) => data,
            None => return Vec::new(),
        };

        let mut changed = Vec::new();
        for field in &self.fields {
            let submitted = match data.get(&self.add_prefix(&field.name)) {
                Some(raw) => raw,
                None => continue,
            };
            // compare in storage form; invalid submissions compare raw
            let submitted_json = self
                .outcome
                .as_ref()
                .and_then(|outcome| outcome.cleaned.get(&field.name))
                .map(|value| field.prepare_value(value))
                .unwrap_or_else(|| submitted.clone());
            let initial_json = self
                .initial
                .get(&field.name)
                .cloned()
                .unwrap_or_else(|| field.prepare_value(&field.initial_value()));
            if submitted_json != initial_json {
                changed.push(field.name.clone());
            }
        }
        changed
    }

    /// Push cleaned data into the namespace's container. The container's
    /// clean cache takes the values verbatim; serialization happens when the
    /// owning record saves.
    pub fn save(&mut self, container: &mut DataContainer) -> Result<()> {
        if !self.is_valid() {
            bail!("cannot save an unbound or invalid form");
        }
        let cleaned = self
            .outcome
            .as_ref()
            .expect("validated form has an outcome")
            .cleaned
            .clone();
        container.update(cleaned);
        Ok(())
    }
}

/// Which of a namespace's fields a composite form includes. `fields: Some`
/// limits to those names; `exclude` always wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl FormOpts {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn fields(names: &[&str]) -> Self {
        Self {
            fields: Some(names.iter().map(|n| n.to_string()).collect()),
            exclude: Vec::new(),
        }
    }

    pub fn exclude(mut self, names: &[&str]) -> Self {
        self.exclude = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// Declarative definition of a composite form: the record type it edits and
/// which namespaces it spans. This is class-level configuration:
/// `add_form`/`remove_form` affect every form bound from this definition
/// afterwards, never a live bound form. A definition derived with
/// `inherit` layers its own entries over its parent's; the first definition
/// of a label wins and an explicit removal suppresses inherited entries for
/// good.
#[derive(Debug, Clone)]
pub struct MultiFormDef {
    meta: Arc<RecordMeta>,
    own: Vec<(String, Option<FormOpts>)>,
    inherited: Vec<(String, Option<FormOpts>)>,
}

impl MultiFormDef {
    pub fn new(meta: Arc<RecordMeta>) -> Self {
        Self {
            meta,
            own: Vec::new(),
            inherited: Vec::new(),
        }
    }

    pub fn meta(&self) -> &Arc<RecordMeta> {
        &self.meta
    }

    /// Derive a new definition inheriting this one's namespace
    /// configuration.
    pub fn inherit(&self) -> Self {
        let mut inherited = self.own.clone();
        inherited.extend(self.inherited.iter().cloned());
        Self {
            meta: self.meta.clone(),
            own: Vec::new(),
            inherited,
        }
    }

    /// Include a namespace. Re-adding a label replaces this definition's own
    /// previous entry for it.
    pub fn add_form(&mut self, label: &str, opts: FormOpts) {
        self.own.retain(|(l, _)| l != label);
        self.own.push((label.to_string(), Some(opts)));
    }

    /// Exclude a namespace, even when an inherited definition declares it.
    pub fn remove_form(&mut self, label: &str) {
        self.own.retain(|(l, _)| l != label);
        self.own.push((label.to_string(), None));
    }

    /// Walk own-then-inherited layers once: first definition of a label
    /// wins, removal tombstones suppress anything later in the walk.
    pub fn resolved_opts(&self) -> Vec<(String, FormOpts)> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut resolved = Vec::new();
        for (label, opts) in self.own.iter().chain(self.inherited.iter()) {
            if !seen.insert(label.as_str()) {
                continue;
            }
            if let Some(opts) = opts {
                resolved.push((label.clone(), opts.clone()));
            }
        }
        resolved
    }

    /// The merged static field set: base fields under their bare names,
    /// namespace fields under `"<label>.<field>"`. Available without a bound
    /// instance so declarative screen layouts can reference namespace fields
    /// up front. Injected namespace fields get a default label prettified
    /// from their local name.
    pub fn base_fields(
        &self,
        registry: &SharedRegistry,
    ) -> Result<BTreeMap<String, FieldDef>> {
        let mut merged = BTreeMap::new();
        for field in &self.meta.schema.fields {
            merged.insert(field.name.clone(), field.clone());
        }
        let registry = registry.read();
        for (label, opts) in self.resolved_opts() {
            let schema = registry
                .get_class(&label, &self.meta.record_type)
                .ok_or_else(|| {
                    anyhow::anyhow!("no schema registered for namespace '{}'", label)
                })?;
            for field in &schema.fields {
                if let Some(allowed) = &opts.fields {
                    if !allowed.iter().any(|a| a == &field.name) {
                        continue;
                    }
                }
                if opts.exclude.iter().any(|e| e == &field.name) {
                    continue;
                }
                let mut field = field.clone();
                if field.label.is_none() {
                    field.label = Some(pretty_name(&field.name));
                }
                merged.insert(format!("{}.{}", label, field.name), field);
            }
        }
        Ok(merged)
    }

    /// Bind a composite form: the base form over the record's own fields
    /// plus one prefixed form per configured namespace. With no record given
    /// an empty one is constructed, which is the create path.
    pub fn bind(
        &self,
        registry: &SharedRegistry,
        data: Option<FormData>,
        record: Option<Record>,
        prefix: Option<&str>,
    ) -> Result<MultiForm> {
        let mut record =
            record.unwrap_or_else(|| Record::new(self.meta.clone(), registry.clone()));

        let base_initial = record.values_to_json();
        let base_form = FieldForm::new(
            self.meta.schema.fields.clone(),
            data.clone(),
            prefix.map(|p| p.to_string()),
            base_initial,
        );

        let mut app_forms = Vec::new();
        for (label, opts) in self.resolved_opts() {
            let composed = match prefix {
                Some(p) => format!("{}-{}", p, label),
                None => label.clone(),
            };
            let container = record.app_data.namespace(&label)?;
            let form = container.get_form(
                data.clone(),
                Some(composed.as_str()),
                opts.fields.as_deref(),
                &opts.exclude,
            );
            app_forms.push((label, form));
        }

        Ok(MultiForm {
            record,
            base_form,
            app_forms,
            saved: false,
        })
    }
}

/// A bound (or display-only) composite form: the record's base form plus one
/// form per configured namespace, validated and saved as one unit.
#[derive(Debug)]
pub struct MultiForm {
    record: Record,
    base_form: FieldForm,
    app_forms: Vec<(String, FieldForm)>,
    saved: bool,
}

impl MultiForm {
    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub fn is_bound(&self) -> bool {
        self.base_form.is_bound()
    }

    pub fn base_form(&mut self) -> &mut FieldForm {
        &mut self.base_form
    }

    pub fn app_form(&mut self, label: &str) -> Option<&mut FieldForm> {
        self.app_forms
            .iter_mut()
            .find(|(l, _)| l == label)
            .map(|(_, form)| form)
    }

    pub fn app_form_labels(&self) -> Vec<&str> {
        self.app_forms.iter().map(|(l, _)| l.as_str()).collect()
    }

    /// Valid iff the base form and every namespace form are valid. Each
    /// sub-form validates independently; there are no cross-namespace
    /// dependencies.
    pub fn is_valid(&mut self) -> bool {
        let mut valid = self.base_form.is_valid();
        for (_, form) in &mut self.app_forms {
            valid &= form.is_valid();
        }
        valid
    }

    /// Merged errors: base form errors under bare field names, namespace
    /// form errors under `"<label>.<field>"`, non-field errors concatenated
    /// under the shared key.
    pub fn errors(&mut self) -> ValidationErrors {
        let mut errors = self.base_form.errors();
        for (label, form) in &mut self.app_forms {
            errors.extend_prefixed(label, form.errors());
        }
        errors
    }

    /// Base form's changed fields plus each namespace form's, dot-prefixed.
    pub fn changed_data(&mut self) -> Vec<String> {
        let mut changed = self.base_form.changed_data();
        for (label, form) in &mut self.app_forms {
            changed.extend(
                form.changed_data()
                    .into_iter()
                    .map(|name| format!("{}.{}", label, name)),
            );
        }
        changed
    }

    /// Save namespace forms first, pushing cleaned values into their data
    /// containers, then apply base fields and persist the record once, so
    /// the stored blob reflects every write from this call. Only a
    /// validated, valid form saves; a save is terminal.
    pub fn save(&mut self, store: &dyn RecordStore) -> Result<&Record> {
        if self.saved {
            bail!("composite form was already saved");
        }
        if !self.is_valid() {
            bail!("cannot save an unbound or invalid composite form");
        }

        for (label, form) in &mut self.app_forms {
            let container = self.record.app_data.namespace(label)?;
            form.save(container)?;
        }

        let cleaned: Vec<(String, FieldValue)> = self
            .base_form
            .cleaned_data()
            .expect("valid form has cleaned data")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, value) in cleaned {
            self.record.set_value(&name, value);
        }

        store.upsert(&mut self.record)?;
        self.saved = true;
        Ok(&self.record)
    }

    pub fn into_record(self) -> Record {
        self.record
    }
}
