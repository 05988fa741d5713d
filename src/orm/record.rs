//! Record types and their cached schema.

use crate::orm::caster::FieldType;
use crate::orm::primary_key::PrimaryKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// One declared field of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub field_type: FieldType,
    /// Internal fields (leading `_`) are never persisted.
    pub internal: bool,
}

impl FieldDescriptor {
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            internal: name.starts_with('_'),
        }
    }
}

/// Shorthand for [`FieldDescriptor::new`].
pub fn field(name: &'static str, field_type: FieldType) -> FieldDescriptor {
    FieldDescriptor::new(name, field_type)
}

/// Columns driving soft deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeleteColumns {
    /// Boolean "row is live" column.
    pub flag: &'static str,
    /// Deletion timestamp, NULL while the row is live.
    pub timestamp: &'static str,
}

impl Default for SoftDeleteColumns {
    fn default() -> Self {
        Self {
            flag: "is_active",
            timestamp: "deleted_at",
        }
    }
}

/// A table-backed record.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct User {
///     id: i64,
///     email: String,
/// }
///
/// impl Record for User {
///     fn table_name() -> &'static str {
///         "users"
///     }
///
///     fn fields() -> Vec<FieldDescriptor> {
///         vec![field("id", FieldType::Int), field("email", FieldType::String)]
///     }
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    fn table_name() -> &'static str;

    /// Declared fields in column order.
    fn fields() -> Vec<FieldDescriptor>;

    /// Key declared by the record itself, used when it has no `id` field.
    fn primary_key() -> Option<PrimaryKey> {
        None
    }

    fn soft_delete() -> SoftDeleteColumns {
        SoftDeleteColumns::default()
    }
}

/// Field layout of a record type, built once per type.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    table: &'static str,
    fields: Vec<FieldDescriptor>,
}

static SCHEMAS: OnceLock<RwLock<HashMap<TypeId, Arc<RecordSchema>>>> = OnceLock::new();

impl RecordSchema {
    /// Schema of `R`, from the process-wide registry.
    pub fn of<R: Record>() -> Arc<RecordSchema> {
        let registry = SCHEMAS.get_or_init(|| RwLock::new(HashMap::new()));
        let id = TypeId::of::<R>();

        if let Ok(schemas) = registry.read() {
            if let Some(schema) = schemas.get(&id) {
                return Arc::clone(schema);
            }
        }

        let schema = Arc::new(RecordSchema {
            table: R::table_name(),
            fields: R::fields(),
        });
        match registry.write() {
            Ok(mut schemas) => Arc::clone(schemas.entry(id).or_insert(schema)),
            Err(_) => schema,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Fields written to the database.
    pub fn persisted(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.internal)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}
