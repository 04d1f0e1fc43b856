use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::logic::registry::SharedRegistry;
use crate::model::{generate_id, ForeignKeyDef, Id, Record, RecordMeta};
use crate::store::blob::BlobField;
use crate::store::traits::RecordStore;

/// Storage form of one record row: base field values as a JSON object plus
/// the opaque serialized namespace blob, exactly the shape a real column
/// store would hold.
#[derive(Debug, Clone)]
struct StoredRecord {
    record_type: Id,
    values: Map<String, Value>,
    app_data: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory record store. Each upsert replaces the whole row, matching the
/// last-write-wins semantics of the surrounding persistence layer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<Id, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn rehydrate(
        &self,
        meta: &Arc<RecordMeta>,
        registry: &SharedRegistry,
        id: &Id,
        stored: &StoredRecord,
    ) -> Result<Record> {
        if stored.record_type != meta.record_type.name {
            return Err(anyhow!(
                "record '{}' is a '{}', not a '{}'",
                id,
                stored.record_type,
                meta.record_type.name
            ));
        }
        let mut record = Record::new(meta.clone(), registry.clone());
        record.id = Some(id.clone());
        record.values_from_json(&stored.values);
        record.app_data =
            BlobField::to_native(&stored.app_data, &meta.record_type, registry.clone())?;
        Ok(record)
    }
}

impl RecordStore for MemoryStore {
    fn upsert(&self, record: &mut Record) -> Result<Id> {
        let id = record.id.clone().unwrap_or_else(generate_id);
        record.id = Some(id.clone());

        let app_data = BlobField::to_storage(&mut record.app_data)?;
        let values = record.values_to_json();
        let now = Utc::now();

        let mut rows = self.rows.write();
        let created_at = rows.get(&id).map(|row| row.created_at).unwrap_or(now);
        rows.insert(
            id.clone(),
            StoredRecord {
                record_type: record.meta.record_type.name.clone(),
                values,
                app_data,
                created_at,
                updated_at: now,
            },
        );
        log::debug!("stored record '{}' ({})", id, record.meta.record_type.name);
        Ok(id)
    }

    fn load(
        &self,
        meta: &Arc<RecordMeta>,
        registry: &SharedRegistry,
        id: &Id,
    ) -> Result<Option<Record>> {
        let rows = self.rows.read();
        match rows.get(id) {
            Some(stored) => Ok(Some(self.rehydrate(meta, registry, id, stored)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &Id) -> Result<bool> {
        Ok(self.rows.write().remove(id).is_some())
    }

    fn list_by_type(
        &self,
        meta: &Arc<RecordMeta>,
        registry: &SharedRegistry,
    ) -> Result<Vec<Record>> {
        let rows = self.rows.read();
        let mut records = Vec::new();
        for (id, stored) in rows.iter() {
            if stored.record_type == meta.record_type.name {
                records.push(self.rehydrate(meta, registry, id, stored)?);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn list_related(
        &self,
        meta: &Arc<RecordMeta>,
        registry: &SharedRegistry,
        fk: &ForeignKeyDef,
        parent_id: &Id,
    ) -> Result<Vec<Record>> {
        let rows = self.rows.read();
        let mut records = Vec::new();
        for (id, stored) in rows.iter() {
            if stored.record_type != meta.record_type.name {
                continue;
            }
            let matches = stored
                .values
                .get(&fk.name)
                .and_then(|value| value.as_str())
                .map_or(false, |value| value == parent_id);
            if matches {
                records.push(self.rehydrate(meta, registry, id, stored)?);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}
