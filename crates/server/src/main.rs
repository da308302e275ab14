//! Demo harness for the recommendation orchestrator.
//!
//! Seeds an in-memory data source, warms the cache, then runs a query, a
//! pantry edit and a status check against the configured store.
//!
//! Usage: `server [config.toml]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Days, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::{
    EngineConfig, IngredientOverlapRanker, MutationKind, RecipeCandidate,
    RecommendationOrchestrator,
};
use sources::{InMemoryDataSource, Interaction, RawPantryItem, UserProfile};

fn seed(source: &InMemoryDataSource) {
    let today = Utc::now().date_naive();
    let in_days = |d: u64| {
        today
            .checked_add_days(Days::new(d))
            .unwrap_or(today)
            .format("%Y-%m-%d")
            .to_string()
    };

    source.replace_pantry(
        1,
        vec![
            RawPantryItem::new("Tomato", 4.0, "pcs").expiring_on(in_days(1)),
            RawPantryItem::new("Fresh Basil", 1.0, "bunch").expiring_on(in_days(2)),
            RawPantryItem::new("Spaghetti", 500.0, "grams").with_category("pasta"),
            RawPantryItem::new("Garlic", 3.0, "pieces").expiring_on(in_days(20)),
        ],
    );
    source.set_profile(
        1,
        UserProfile {
            dietary_restrictions: vec!["vegetarian".into()],
            allergens: vec!["peanut".into()],
        },
    );
    let now = Utc::now();
    for (id, rating) in [("r-marinara", 5.0), ("r-risotto", 4.0), ("r-pesto", 5.0)] {
        source.insert_interaction(
            1,
            Interaction::rated(id, "italian", rating, now).with_tags(["vegetarian"]),
        );
    }
    source.insert_user(2);
}

fn candidates() -> Vec<RecipeCandidate> {
    vec![
        RecipeCandidate::new("r-pomodoro", "Spaghetti al Pomodoro", ["spaghetti", "tomato", "basil", "garlic"])
            .with_cuisine("italian")
            .with_tags(["vegetarian"]),
        RecipeCandidate::new("r-bruschetta", "Bruschetta", ["bread", "tomato", "basil"])
            .with_cuisine("italian")
            .with_tags(["vegetarian", "vegan"]),
        RecipeCandidate::new("r-satay", "Chicken Satay", ["chicken", "peanut"]).with_cuisine("thai"),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,server=debug,pipeline=debug,cache=debug")),
        )
        .init();

    info!("Starting pantry recommendation harness");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(&path)
            .await
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => EngineConfig::default(),
    };

    let source = Arc::new(InMemoryDataSource::new());
    seed(&source);

    let orchestrator = RecommendationOrchestrator::from_config(
        &config,
        source.clone(),
        Arc::new(IngredientOverlapRanker),
        None,
    )
    .await?;
    let _monitor = orchestrator.spawn_health_monitor();

    let report = orchestrator.warm(&[1, 2], "startup").await;
    info!(
        "Warm report: {}",
        serde_json::to_string(&report.outcomes).context("Encoding warm report")?
    );

    let result = orchestrator
        .submit_query(1, "Something quick with tomatoes", candidates(), None)
        .await;
    info!("Query status {:?}, {} recipes:", result.status, result.recipes.len());
    for (i, recipe) in result.recipes.iter().enumerate() {
        info!(
            "{}. {} - Score: {:.3} (uses {})",
            i + 1,
            recipe.title,
            recipe.rank_score,
            recipe.matched_ingredients.join(", ")
        );
    }

    source.insert_pantry_item(1, RawPantryItem::new("Bread", 1.0, "loaf"));
    let removed = orchestrator.notify_mutation(1, MutationKind::PantryEdit).await;
    info!("Pantry edit removed {} cached entries", removed);

    // Give the eager refresh a moment to land
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = orchestrator.get_status(1).await;
    info!(
        "User 1 status: {}",
        serde_json::to_string(&status).context("Encoding user status")?
    );
    let stats = orchestrator.get_system_stats();
    info!(
        "System stats: {}",
        serde_json::to_string(&stats).context("Encoding system stats")?
    );

    Ok(())
}
