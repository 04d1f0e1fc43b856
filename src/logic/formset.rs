use anyhow::{bail, Result};
use serde_json::Value;

use crate::logic::forms::{FormData, MultiForm, MultiFormDef, ValidationErrors};
use crate::logic::registry::SharedRegistry;
use crate::model::{find_foreign_key, FieldValue, ForeignKeyDef, Id, Record, RecordMeta};
use crate::store::traits::RecordStore;

/// Declarative definition of a collection of composite forms: the row form
/// definition plus row-count and deletion policy. The inline variant binds
/// the rows to a parent record through a resolved foreign key.
#[derive(Debug, Clone)]
pub struct MultiFormSetDef {
    form_def: MultiFormDef,
    prefix: String,
    extra: usize,
    can_delete: bool,
    max_num: Option<usize>,
    fk: Option<ForeignKeyDef>,
}

impl MultiFormSetDef {
    pub fn new(form_def: MultiFormDef) -> Self {
        Self {
            form_def,
            prefix: "form".to_string(),
            extra: 3,
            can_delete: true,
            max_num: None,
            fk: None,
        }
    }

    /// Definition for rows related to `parent` through a foreign key on the
    /// row type. A unique foreign key collapses the row count to exactly
    /// one; enforced here, not left to the caller.
    pub fn inline(
        parent: &RecordMeta,
        form_def: MultiFormDef,
        fk_name: Option<&str>,
    ) -> Result<Self> {
        let fk = find_foreign_key(parent, form_def.meta(), fk_name)?.clone();
        let mut def = Self::new(form_def);
        if fk.unique {
            def.max_num = Some(1);
            def.extra = 1;
        }
        def.fk = Some(fk);
        Ok(def)
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn extra(mut self, extra: usize) -> Self {
        self.extra = extra;
        self
    }

    pub fn can_delete(mut self, can_delete: bool) -> Self {
        self.can_delete = can_delete;
        self
    }

    pub fn max_num(mut self, max_num: usize) -> Self {
        self.max_num = Some(max_num);
        self
    }

    pub fn form_def(&self) -> &MultiFormDef {
        &self.form_def
    }

    pub fn foreign_key(&self) -> Option<&ForeignKeyDef> {
        self.fk.as_ref()
    }

    /// Bind one composite form per existing record plus the configured extra
    /// blank rows, each under its own `"<prefix>-<index>"` prefix.
    pub fn bind(
        &self,
        registry: &SharedRegistry,
        data: Option<&FormData>,
        existing: Vec<Record>,
    ) -> Result<MultiFormSet> {
        let mut total = existing.len() + self.extra;
        if let Some(max) = self.max_num {
            // existing rows are always shown, the cap limits blanks
            total = total.min(max.max(existing.len()));
        }

        let mut rows = Vec::with_capacity(total);
        let mut records = existing.into_iter();
        for index in 0..total {
            let row_prefix = format!("{}-{}", self.prefix, index);
            let record = records.next();
            let is_existing = record.is_some();
            let marked_delete = self.can_delete
                && data
                    .and_then(|d| d.get(&format!("{}-DELETE", row_prefix)))
                    .map_or(false, is_truthy);
            let form =
                self.form_def
                    .bind(registry, data.cloned(), record, Some(row_prefix.as_str()))?;
            rows.push(FormSetRow {
                form,
                is_existing,
                marked_delete,
            });
        }

        Ok(MultiFormSet {
            rows,
            fk: self.fk.clone(),
            saved: false,
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_lowercase().as_str(), "on" | "true" | "1"),
        Value::Number(n) => n.as_i64() != Some(0),
        _ => false,
    }
}

#[derive(Debug)]
struct FormSetRow {
    form: MultiForm,
    is_existing: bool,
    marked_delete: bool,
}

impl FormSetRow {
    /// Extra rows the user never touched are ignored by validation and save.
    fn is_blank_extra(&mut self) -> bool {
        !self.is_existing && self.form.changed_data().is_empty()
    }
}

/// A bound collection of composite forms over a list of related records.
#[derive(Debug)]
pub struct MultiFormSet {
    rows: Vec<FormSetRow>,
    fk: Option<ForeignKeyDef>,
    saved: bool,
}

impl MultiFormSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn form(&mut self, index: usize) -> Option<&mut MultiForm> {
        self.rows.get_mut(index).map(|row| &mut row.form)
    }

    /// Valid iff every live row is valid. Deleted rows and untouched extra
    /// rows are skipped.
    pub fn is_valid(&mut self) -> bool {
        let mut valid = true;
        for row in &mut self.rows {
            if row.marked_delete || row.is_blank_extra() {
                continue;
            }
            valid &= row.form.is_valid();
        }
        valid
    }

    /// Per-row errors, index-aligned; skipped rows report empty errors.
    pub fn errors(&mut self) -> Vec<ValidationErrors> {
        self.rows
            .iter_mut()
            .map(|row| {
                if row.marked_delete || row.is_blank_extra() {
                    ValidationErrors::new()
                } else {
                    row.form.errors()
                }
            })
            .collect()
    }

    /// Delete flagged existing rows, assign the foreign key on kept rows and
    /// save each through its composite form. Returns the ids of saved rows.
    pub fn save(
        &mut self,
        store: &dyn RecordStore,
        parent_id: Option<&Id>,
    ) -> Result<Vec<Id>> {
        if self.saved {
            bail!("formset was already saved");
        }
        if !self.is_valid() {
            bail!("cannot save an invalid formset");
        }

        let mut saved_ids = Vec::new();
        for row in &mut self.rows {
            if row.marked_delete {
                if let Some(id) = row.form.record().id.clone() {
                    store.delete(&id)?;
                    log::debug!("deleted formset row '{}'", id);
                }
                continue;
            }
            if row.is_blank_extra() {
                continue;
            }
            if let (Some(fk), Some(parent)) = (&self.fk, parent_id) {
                row.form
                    .record_mut()
                    .set_value(&fk.name, FieldValue::Str(parent.clone()));
            }
            let record = row.form.save(store)?;
            if let Some(id) = record.id.clone() {
                saved_ids.push(id);
            }
        }
        self.saved = true;
        Ok(saved_ids)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::logic::forms::{FormOpts, MultiFormDef};
    use crate::logic::registry::new_registry;
    use crate::model::{DataType, FieldDef, FormSchema, RecordType};
    use crate::store::memory::MemoryStore;

    fn author_meta() -> Arc<RecordMeta> {
        Arc::new(RecordMeta::new(
            RecordType::new("author"),
            FormSchema::new("author", vec![FieldDef::new("name", DataType::String)]),
        ))
    }

    fn article_meta(unique_fk: bool) -> Arc<RecordMeta> {
        Arc::new(
            RecordMeta::new(
                RecordType::new("article"),
                FormSchema::new("article", vec![FieldDef::new("title", DataType::String)]),
            )
            .with_foreign_keys(vec![ForeignKeyDef {
                name: "author".to_string(),
                target: "author".to_string(),
                unique: unique_fk,
            }]),
        )
    }

    fn article_def(unique_fk: bool) -> MultiFormDef {
        MultiFormDef::new(article_meta(unique_fk))
    }

    #[test]
    fn inline_resolves_the_foreign_key() {
        let parent = author_meta();
        let def = MultiFormSetDef::inline(&parent, article_def(false), None).unwrap();
        assert_eq!(def.foreign_key().unwrap().name, "author");
    }

    #[test]
    fn unique_foreign_key_caps_the_formset_at_one_row() {
        let parent = author_meta();
        let registry = new_registry(None);
        let def = MultiFormSetDef::inline(&parent, article_def(true), None).unwrap();

        let set = def.bind(&registry, None, Vec::new()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn untouched_extra_rows_are_skipped_by_validation_and_save() {
        let registry = new_registry(None);
        let def = MultiFormSetDef::new(article_def(false)).extra(3);
        let store = MemoryStore::new();

        let data: FormData = [("form-0-title".to_string(), json!("Only row"))].into();
        let mut set = def.bind(&registry, Some(&data), Vec::new()).unwrap();
        assert_eq!(set.len(), 3);
        // rows 1 and 2 are blank; a required title on them must not fail
        assert!(set.is_valid());

        let saved = set.save(&store, None).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_flag_removes_the_existing_row() {
        let registry = new_registry(None);
        let def = MultiFormSetDef::new(article_def(false)).extra(0);
        let store = MemoryStore::new();

        let mut record = Record::new(article_meta(false), registry.clone());
        record.set_value("title", FieldValue::Str("Doomed".into()));
        store.upsert(&mut record).unwrap();
        let id = record.id.clone().unwrap();

        let data: FormData = [
            ("form-0-title".to_string(), json!("Doomed")),
            ("form-0-DELETE".to_string(), json!("on")),
        ]
        .into();
        let mut set = def.bind(&registry, Some(&data), vec![record]).unwrap();

        assert!(set.is_valid());
        let saved = set.save(&store, None).unwrap();
        assert!(saved.is_empty());
        let meta = article_meta(false);
        assert!(store.load(&meta, &registry, &id).unwrap().is_none());
    }

    #[test]
    fn inline_save_assigns_the_parent_foreign_key() {
        let registry = new_registry(None);
        let parent = author_meta();
        let def = MultiFormSetDef::inline(&parent, article_def(false), None)
            .unwrap()
            .extra(1);
        let store = MemoryStore::new();

        let data: FormData = [("form-0-title".to_string(), json!("Child"))].into();
        let mut set = def.bind(&registry, Some(&data), Vec::new()).unwrap();
        assert!(set.is_valid());

        let parent_id: Id = "author-1".to_string();
        let saved = set.save(&store, Some(&parent_id)).unwrap();
        assert_eq!(saved.len(), 1);

        let meta = article_meta(false);
        let fk = meta.foreign_keys[0].clone();
        let related = store
            .list_related(&meta, &registry, &fk, &parent_id)
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(
            related[0].value("title"),
            Some(&FieldValue::Str("Child".into()))
        );
    }

    #[test]
    fn formset_with_no_namespaces_still_validates_rows() {
        let registry = new_registry(None);
        let def = MultiFormSetDef::new(article_def(false)).extra(1);

        let data: FormData = [("form-0-title".to_string(), json!(""))].into();
        let mut set = def.bind(&registry, Some(&data), Vec::new()).unwrap();

        assert!(!set.is_valid());
        let errors = set.errors();
        assert!(errors[0].get("title").is_some());
    }

    #[test]
    fn formset_save_is_terminal() {
        let registry = new_registry(None);
        let def = MultiFormSetDef::new(article_def(false)).extra(1);
        let store = MemoryStore::new();

        let data: FormData = [("form-0-title".to_string(), json!("Row"))].into();
        let mut set = def.bind(&registry, Some(&data), Vec::new()).unwrap();
        set.save(&store, None).unwrap();
        assert!(set.save(&store, None).is_err());
    }

    #[test]
    fn namespace_forms_participate_in_formset_rows() {
        let registry = new_registry(None);
        registry
            .write()
            .register(
                "publish",
                Arc::new(FormSchema::new(
                    "publish",
                    vec![FieldDef::new("publish_from", DataType::Date)],
                )),
                None,
                false,
            )
            .unwrap();

        let mut form_def = article_def(false);
        form_def.add_form("publish", FormOpts::all());
        let def = MultiFormSetDef::new(form_def).extra(1);
        let store = MemoryStore::new();

        let data: FormData = [
            ("form-0-title".to_string(), json!("Row")),
            ("form-0-publish-publish_from".to_string(), json!("2020-01-01")),
        ]
        .into();
        let mut set = def.bind(&registry, Some(&data), Vec::new()).unwrap();
        assert!(set.is_valid());
        set.save(&store, None).unwrap();

        let meta = article_meta(false);
        let rows = store.list_by_type(&meta, &registry).unwrap();
        assert_eq!(rows.len(), 1);
        let mut row = rows.into_iter().next().unwrap();
        let blob = row.app_data.serialize();
        assert_eq!(
            blob.get("publish"),
            Some(&json!({"publish_from": "2020-01-01"}))
        );
    }
}
