//! Selection-preference store.
//!
//! Preferences are an ordered list; saving replaces the whole list in one
//! transaction and assigns sort_order from list position, so evaluation
//! order is exactly the order the caller supplied.

use sqlx::{Pool, Sqlite};
use thresh_schema::{EngineError, EngineResult, SelectionPreference};
use tracing::info;

/// Shipped defaults: keep curated locations, sacrifice scratch space.
pub const DEFAULT_PREFERENCES: &[(&str, i64)] = &[
    ("/photos", 80),
    ("/documents", 60),
    ("/home", 40),
    ("/downloads", 10),
];

#[derive(Clone)]
pub struct PreferenceStore {
    pool: Pool<Sqlite>,
}

impl PreferenceStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// All preferences in evaluation order.
    pub async fn list(&self) -> EngineResult<Vec<SelectionPreference>> {
        let prefs = sqlx::query_as("SELECT * FROM th_preferences ORDER BY sort_order")
            .fetch_all(&self.pool)
            .await?;
        Ok(prefs)
    }

    /// Replace the full preference list. Validates before touching the
    /// table; the swap itself is atomic.
    pub async fn replace_all(&self, prefs: &[SelectionPreference]) -> EngineResult<()> {
        for pref in prefs {
            if pref.path_prefix.trim().is_empty() {
                return Err(EngineError::Configuration(
                    "preference path prefix must not be empty".to_string(),
                ));
            }
            if !(0..=100).contains(&pref.priority) {
                return Err(EngineError::Configuration(format!(
                    "preference priority {} for '{}' is outside 0-100",
                    pref.priority, pref.path_prefix
                )));
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM th_preferences")
            .execute(&mut *tx)
            .await?;
        for (position, pref) in prefs.iter().enumerate() {
            sqlx::query(
                "INSERT INTO th_preferences (path_prefix, priority, sort_order) VALUES (?, ?, ?)",
            )
            .bind(&pref.path_prefix)
            .bind(pref.priority)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!("Saved {} selection preferences", prefs.len());
        Ok(())
    }

    pub async fn reset_defaults(&self) -> EngineResult<Vec<SelectionPreference>> {
        let defaults: Vec<SelectionPreference> = DEFAULT_PREFERENCES
            .iter()
            .map(|(prefix, priority)| SelectionPreference {
                id: 0,
                path_prefix: prefix.to_string(),
                priority: *priority,
                sort_order: 0,
            })
            .collect();
        self.replace_all(&defaults).await?;
        self.list().await
    }
}
