//! # Sources Crate
//!
//! The Data Source collaborator: the system of record for raw user data
//! that the background pipelines read from.
//!
//! ## Components
//!
//! ### DataSource (trait)
//! Async access to a user's raw pantry items, recipe interactions and
//! profile. Production deployments implement it over their own store.
//!
//! ### InMemoryDataSource
//! A lock-protected in-memory implementation used by the demo harness and
//! in tests.
//!
//! ## Example Usage
//!
//! ```ignore
//! use sources::{DataSource, InMemoryDataSource, RawPantryItem};
//!
//! let source = InMemoryDataSource::new();
//! source.insert_pantry_item(42, RawPantryItem::new("Milk", 1.0, "liter"));
//!
//! let items = source.fetch_pantry_items(42).await?;
//! ```

pub mod in_memory;
pub mod types;

use artifacts::UserId;
use async_trait::async_trait;
use thiserror::Error;

// Re-export commonly used types
pub use in_memory::InMemoryDataSource;
pub use types::{Interaction, InteractionKind, RawPantryItem, UserProfile};

/// Errors reported by a data source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// System of record for raw user data.
///
/// Implementations must be shareable across tasks: the pantry and
/// preference pipelines of many users read concurrently.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_pantry_items(&self, user_id: UserId) -> SourceResult<Vec<RawPantryItem>>;

    async fn fetch_interactions(&self, user_id: UserId) -> SourceResult<Vec<Interaction>>;

    async fn fetch_profile(&self, user_id: UserId) -> SourceResult<UserProfile>;
}
