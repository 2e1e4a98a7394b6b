//! Object-level permissions: grant, revoke and query named permissions
//! ("view", "edit", "admin", ...) scoped to individual object instances,
//! for user and group subjects, over a SQLite-backed grant store.

pub mod db;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod events;
pub mod models;
pub mod registry;
pub mod store;

// Re-export commonly used items for callers and tests
pub use directory::{Directory, SqliteDirectory};
pub use engine::Engine;
pub use errors::{PermError, PermResult};
pub use events::{EventBus, PermissionEvent};
pub use models::{GrantRecord, GrantRow, ObjectRef, Subject, SubjectKind};
pub use registry::Registry;
pub use store::{GrantFilter, GrantStore, SqliteGrantStore, SubjectSel};
