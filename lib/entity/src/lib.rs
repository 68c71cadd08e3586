//! Entity collaborator interfaces for keel.
//!
//! The workflow engine never talks to a database directly. It reads and
//! writes business entities through the traits in this crate:
//!
//! - **Entities**: a field bag per object type with change tracking
//! - **Definitions**: the field list and field types of an object type
//! - **Queries**: `where(field).equals(value)` style filters
//! - **Stores**: [`EntityStore`] for load/save, [`QueryIndex`] for filtering
//!
//! [`MemoryEntityStore`] implements both traits in memory.

pub mod actor;
pub mod definition;
pub mod entity;
pub mod error;
pub mod memory;
pub mod query;
pub mod store;

pub use actor::Actor;
pub use definition::{EntityDefinition, Field, FieldType};
pub use entity::Entity;
pub use error::EntityError;
pub use memory::MemoryEntityStore;
pub use query::{
    Combinator, EntityQuery, Operator, QueryResults, Where, WhereBuilder, conditions_match,
};
pub use store::{EntityStore, QueryIndex};
