//! Persistence stores.
//!
//! Every store has an in-memory implementation for tests and dev plus a
//! SQLite implementation behind the shared [`db::Db`] handle. The trait
//! contracts are narrow and property-based: both backends pass the same
//! tests for ownership, ordering, and idempotence.

pub mod chat;
pub mod db;
pub mod prefs;
pub mod projects;
pub mod specialists;
pub mod warpp;

pub use chat::{ChatMessage, ChatSession, ChatStore, MemoryChatStore, NewMessage, SqliteChatStore};
pub use db::Db;
pub use prefs::{
    MemoryPreferencesStore, SqlitePreferencesStore, UserPreferences, UserPreferencesStore,
};
pub use projects::{
    MemoryProjectsStore, Project, ProjectFile, ProjectsStore, SqliteProjectsStore,
};
pub use specialists::{
    MemorySpecialistsStore, MemoryTeamsStore, SpecialistsStore, SqliteSpecialistsStore,
    SqliteTeamsStore, TeamsStore,
};
pub use warpp::{MemoryWarppStore, SqliteWarppStore, WarppStore};
