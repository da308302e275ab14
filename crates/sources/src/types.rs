//! Raw records as the system of record hands them out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pantry entry exactly as the user entered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPantryItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: Option<String>,
    /// `YYYY-MM-DD`, free text from the client
    pub expires_on: Option<String>,
}

impl RawPantryItem {
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
            category: None,
            expires_on: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn expiring_on(mut self, date: impl Into<String>) -> Self {
        self.expires_on = Some(date.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Viewed,
    Saved,
    Cooked,
    Rated,
}

/// One user interaction with a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub recipe_id: String,
    pub kind: InteractionKind,
    pub cuisine: Option<String>,
    /// Star rating in 1..=5 when the user rated the recipe
    pub rating: Option<f64>,
    /// Recipe tags ("vegetarian", "gluten-free", ...)
    pub tags: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Interaction {
    pub fn rated(
        recipe_id: impl Into<String>,
        cuisine: impl Into<String>,
        rating: f64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipe_id: recipe_id.into(),
            kind: InteractionKind::Rated,
            cuisine: Some(cuisine.into()),
            rating: Some(rating),
            tags: Vec::new(),
            occurred_at,
        }
    }

    pub fn viewed(recipe_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            recipe_id: recipe_id.into(),
            kind: InteractionKind::Viewed,
            cuisine: None,
            rating: None,
            tags: Vec::new(),
            occurred_at,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Explicit settings from the user's profile.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub dietary_restrictions: Vec<String>,
    pub allergens: Vec<String>,
}
