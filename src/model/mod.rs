pub mod common;
pub mod field;
pub mod record;
pub mod schema;
pub mod value;

pub use common::{generate_id, DataType, Id};
pub use field::{pretty_name, FieldDef};
pub use record::{find_foreign_key, ForeignKeyDef, Record, RecordMeta, RecordType};
pub use schema::FormSchema;
pub use value::FieldValue;
