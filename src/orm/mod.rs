//! Record mapping.
//!
//! [`RecordGateway`] is the entry point. The other modules are the parts it
//! is built from and are usable on their own: the builders never perform I/O.

pub mod builder;
pub mod caster;
pub mod crud;
pub mod gateway;
pub mod pagination;
pub mod primary_key;
pub mod record;
pub mod soft_delete;
pub mod validator;

pub use builder::{QueryBuilder, Statement};
pub use caster::FieldType;
pub use crud::CrudOperations;
pub use gateway::RecordGateway;
pub use pagination::PaginationState;
pub use primary_key::{KeyKind, PrimaryKey, PrimaryKeyStrategy};
pub use record::{FieldDescriptor, Record, RecordSchema, SoftDeleteColumns, field};
pub use soft_delete::SoftDeleteOperations;
