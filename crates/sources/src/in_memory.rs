//! In-memory data source.

use artifacts::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::types::{Interaction, RawPantryItem, UserProfile};
use crate::{DataSource, SourceError, SourceResult};

#[derive(Debug, Default, Clone)]
struct UserRecord {
    pantry: Vec<RawPantryItem>,
    interactions: Vec<Interaction>,
    profile: UserProfile,
}

/// Data source backed by a map of user records.
///
/// Users become known the first time anything is inserted for them.
/// Lookups for unknown users fail with `UserNotFound`.
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with no data.
    pub fn insert_user(&self, user_id: UserId) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default();
    }

    pub fn insert_pantry_item(&self, user_id: UserId, item: RawPantryItem) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .pantry
            .push(item);
    }

    /// Replace the whole pantry (a pantry edit).
    pub fn replace_pantry(&self, user_id: UserId, items: Vec<RawPantryItem>) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .pantry = items;
    }

    pub fn insert_interaction(&self, user_id: UserId, interaction: Interaction) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .interactions
            .push(interaction);
    }

    pub fn set_profile(&self, user_id: UserId, profile: UserProfile) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .profile = profile;
    }

    pub fn user_count(&self) -> usize {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn with_user<T>(&self, user_id: UserId, read: impl FnOnce(&UserRecord) -> T) -> SourceResult<T> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users
            .get(&user_id)
            .map(read)
            .ok_or(SourceError::UserNotFound(user_id))
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn fetch_pantry_items(&self, user_id: UserId) -> SourceResult<Vec<RawPantryItem>> {
        let items = self.with_user(user_id, |u| u.pantry.clone())?;
        debug!("Fetched {} pantry items for user {}", items.len(), user_id);
        Ok(items)
    }

    async fn fetch_interactions(&self, user_id: UserId) -> SourceResult<Vec<Interaction>> {
        let interactions = self.with_user(user_id, |u| u.interactions.clone())?;
        debug!(
            "Fetched {} interactions for user {}",
            interactions.len(),
            user_id
        );
        Ok(interactions)
    }

    async fn fetch_profile(&self, user_id: UserId) -> SourceResult<UserProfile> {
        self.with_user(user_id, |u| u.profile.clone())
    }
}
