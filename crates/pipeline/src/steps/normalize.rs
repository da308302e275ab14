//! Normalizes raw pantry items into `PantryItem`s.

use artifacts::PantryItem;
use async_trait::async_trait;
use sources::RawPantryItem;
use tracing::{debug, warn};

use crate::state::PantryState;
use crate::traits::{PipelineError, Step};

/// Trim, lowercase and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a free-text unit onto its canonical short form.
///
/// Unknown units are kept, lowercased.
pub fn canonical_unit(unit: &str) -> String {
    let unit = unit.trim().to_lowercase();
    let canonical = match unit.as_str() {
        "g" | "gr" | "gram" | "grams" => "g",
        "kg" | "kilo" | "kilos" | "kilogram" | "kilograms" => "kg",
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "ml",
        "l" | "liter" | "liters" | "litre" | "litres" => "l",
        "lb" | "lbs" | "pound" | "pounds" => "lb",
        "oz" | "ounce" | "ounces" => "oz",
        "tbsp" | "tablespoon" | "tablespoons" => "tbsp",
        "tsp" | "teaspoon" | "teaspoons" => "tsp",
        "cup" | "cups" => "cup",
        "" | "pc" | "pcs" | "piece" | "pieces" | "unit" | "units" | "each" => "pc",
        other => other,
    };
    canonical.to_string()
}

fn normalize_item(raw: &RawPantryItem) -> Option<PantryItem> {
    let normalized_name = normalize_name(&raw.name);
    if normalized_name.is_empty() {
        return None;
    }
    if !raw.quantity.is_finite() || raw.quantity < 0.0 {
        return None;
    }
    let category = raw
        .category
        .as_deref()
        .map(normalize_name)
        .filter(|c| !c.is_empty());
    let expires_on = raw
        .expires_on
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    Some(PantryItem {
        name: raw.name.trim().to_string(),
        normalized_name,
        quantity: raw.quantity,
        unit: canonical_unit(&raw.unit),
        category,
        expires_on,
        days_until_expiry: None,
    })
}

/// Drops items with empty names or invalid quantities and caps the pantry
/// at `max_items`.
pub struct NormalizeStep {
    max_items: usize,
}

impl NormalizeStep {
    pub fn new(max_items: usize) -> Self {
        Self { max_items }
    }
}

#[async_trait]
impl Step<PantryState> for NormalizeStep {
    fn name(&self) -> &str {
        "normalize"
    }

    async fn execute(&self, state: &mut PantryState) -> Result<(), PipelineError> {
        let mut items = Vec::with_capacity(state.raw_items.len().min(self.max_items));
        for raw in &state.raw_items {
            match normalize_item(raw) {
                Some(item) => items.push(item),
                None => warn!(
                    "Dropping invalid pantry item {:?} for user {}",
                    raw.name, state.user_id
                ),
            }
        }

        if items.len() > self.max_items {
            warn!(
                "User {} has {} pantry items, keeping the first {}",
                state.user_id,
                items.len(),
                self.max_items
            );
            items.truncate(self.max_items);
        }

        debug!(
            "Normalized {} of {} pantry items for user {}",
            items.len(),
            state.raw_items.len(),
            state.user_id
        );
        state.items = items;
        Ok(())
    }
}
