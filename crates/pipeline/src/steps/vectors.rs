//! Hashed ingredient vectors.

use artifacts::PantryItem;
use async_trait::async_trait;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::state::PantryState;
use crate::traits::{PipelineError, Step};

/// Feature-hash one item into a `dimensions`-long, L2-normalized vector.
///
/// Tokens are the words of the normalized name plus `cat:<category>`. Each
/// token's SHA-256 digest picks a slot (first 4 bytes) and a sign (5th byte).
pub fn ingredient_vector(item: &PantryItem, dimensions: usize) -> Vec<f64> {
    let mut vector = vec![0.0; dimensions];
    if dimensions == 0 {
        return vector;
    }

    let category = item.category.as_ref().map(|c| format!("cat:{}", c));
    let tokens = item
        .normalized_name
        .split_whitespace()
        .map(str::to_string)
        .chain(category);

    for token in tokens {
        let digest = Sha256::digest(token.as_bytes());
        let slot = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % dimensions;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

/// Computes one vector per normalized item.
///
/// Hashing runs on the blocking pool, spread across rayon workers.
pub struct ComputeVectorsStep {
    dimensions: usize,
}

impl ComputeVectorsStep {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Step<PantryState> for ComputeVectorsStep {
    fn name(&self) -> &str {
        "compute-vectors"
    }

    async fn execute(&self, state: &mut PantryState) -> Result<(), PipelineError> {
        let items = state.items.clone();
        let dimensions = self.dimensions;

        let vectors = tokio::task::spawn_blocking(move || {
            items
                .par_iter()
                .map(|item| ingredient_vector(item, dimensions))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| PipelineError::step_failure(self.name(), e.to_string()))?;

        debug!(
            "Computed {} ingredient vectors for user {}",
            vectors.len(),
            state.user_id
        );
        state.vectors = vectors;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, category: Option<&str>) -> PantryItem {
        PantryItem {
            name: name.to_string(),
            normalized_name: name.to_string(),
            quantity: 1.0,
            unit: "pc".to_string(),
            category: category.map(str::to_string),
            expires_on: None,
            days_until_expiry: None,
        }
    }

    #[test]
    fn test_vector_is_unit_length_and_deterministic() {
        let a = ingredient_vector(&item("red bell pepper", Some("produce")), 32);
        let b = ingredient_vector(&item("red bell pepper", Some("produce")), 32);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let norm: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_dimensions() {
        assert!(ingredient_vector(&item("egg", None), 0).is_empty());
    }

    #[tokio::test]
    async fn test_one_vector_per_item() {
        let mut state = PantryState::new(1);
        state.items = vec![item("egg", None), item("flour", Some("baking"))];

        ComputeVectorsStep::new(16)
            .execute(&mut state)
            .await
            .unwrap();
        assert_eq!(state.vectors.len(), 2);
        assert!(state.vectors.iter().all(|v| v.len() == 16));
    }
}
