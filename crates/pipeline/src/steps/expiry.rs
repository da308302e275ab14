//! Expiry analysis for normalized pantry items.

use artifacts::{Clock, ExpiryAnalysis, ExpiryBucket, PantryItem};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::state::PantryState;
use crate::traits::{PipelineError, Step};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Buckets dated items by days until expiry and scores urgency.
///
/// Undated items are not bucketed but count toward the total used for the
/// urgency score. Any unparseable date fails the step.
pub struct AnalyzeExpiryStep {
    clock: Arc<dyn Clock>,
}

impl AnalyzeExpiryStep {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Days from `today` to each item's expiry date, `None` for undated items.
pub fn days_until_expiry(
    items: &[PantryItem],
    today: NaiveDate,
) -> Result<Vec<Option<i64>>, String> {
    items
        .iter()
        .map(|item| match &item.expires_on {
            None => Ok(None),
            Some(raw) => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(|date| Some((date - today).num_days()))
                .map_err(|e| format!("bad expiry date {:?} on {}: {}", raw, item.normalized_name, e)),
        })
        .collect()
}

/// Build the analysis from per-item day counts.
pub fn analyze(items: &[PantryItem], days: &[Option<i64>]) -> ExpiryAnalysis {
    let mut buckets: BTreeMap<ExpiryBucket, usize> =
        ExpiryBucket::ALL.iter().map(|b| (*b, 0)).collect();
    let mut urgent: Vec<(i64, &str)> = Vec::new();

    for (item, days) in items.iter().zip(days) {
        let Some(days) = *days else { continue };
        let bucket = ExpiryBucket::from_days(days);
        *buckets.entry(bucket).or_insert(0) += 1;
        if bucket.is_urgent() {
            urgent.push((days, item.normalized_name.as_str()));
        }
    }

    let urgency_score = if items.is_empty() {
        0.0
    } else {
        urgent.len() as f64 / items.len() as f64
    };

    // Soonest first, name as tie-breaker
    urgent.sort();

    ExpiryAnalysis {
        buckets,
        urgency_score,
        priority_items: urgent.into_iter().map(|(_, name)| name.to_string()).collect(),
    }
}

#[async_trait]
impl Step<PantryState> for AnalyzeExpiryStep {
    fn name(&self) -> &str {
        "analyze-expiry"
    }

    async fn execute(&self, state: &mut PantryState) -> Result<(), PipelineError> {
        let today = self.clock.now().date_naive();
        let days = days_until_expiry(&state.items, today)
            .map_err(|reason| PipelineError::step_failure(self.name(), reason))?;
        let analysis = analyze(&state.items, &days);

        debug!(
            "User {} pantry urgency {:.2} ({} priority items)",
            state.user_id,
            analysis.urgency_score,
            analysis.priority_items.len()
        );
        for (item, days) in state.items.iter_mut().zip(days) {
            item.days_until_expiry = days;
        }
        state.expiry = analysis;
        Ok(())
    }
}
