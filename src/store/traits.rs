use std::sync::Arc;

use anyhow::Result;

use crate::logic::registry::SharedRegistry;
use crate::model::{ForeignKeyDef, Id, Record, RecordMeta};

/// Persistence seam the core saves records through. A record, meaning its
/// base fields plus the serialized namespace blob, is written as one unit;
/// whatever transactional guarantees apply come from the implementation.
pub trait RecordStore {
    /// Persist the record, assigning an id on first save. The namespace
    /// container is serialized into the blob as part of the same write.
    fn upsert(&self, record: &mut Record) -> Result<Id>;

    /// Load a record, rehydrating base fields and the namespace container.
    fn load(
        &self,
        meta: &Arc<RecordMeta>,
        registry: &SharedRegistry,
        id: &Id,
    ) -> Result<Option<Record>>;

    fn delete(&self, id: &Id) -> Result<bool>;

    fn list_by_type(
        &self,
        meta: &Arc<RecordMeta>,
        registry: &SharedRegistry,
    ) -> Result<Vec<Record>>;

    /// Records of `meta`'s type whose foreign key field holds `parent_id`.
    fn list_related(
        &self,
        meta: &Arc<RecordMeta>,
        registry: &SharedRegistry,
        fk: &ForeignKeyDef,
        parent_id: &Id,
    ) -> Result<Vec<Record>>;
}
