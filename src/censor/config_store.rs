//! The operator-editable moderation policy.

use tracing::{info, instrument};

use crate::{db::Db, error::CensorError, models::ModerationConfig};

/// Reads and writes the single moderation policy row.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    db: Db,
}

impl ConfigStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Returns the policy, creating and persisting the defaults on first use.
    #[instrument(skip_all)]
    pub async fn get(&self) -> Result<ModerationConfig, CensorError> {
        if let Some(config) = self.load().await? {
            return Ok(config);
        }

        // Concurrent first reads race here; the loser's insert is a no-op.
        let defaults = ModerationConfig::default();
        let inserted = sqlx::query(
            r#"
            INSERT INTO moderation_config (id, enabled, interval_secs, politician, pulp, ads, terror)
                VALUES (1, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(defaults.enabled)
        .bind(defaults.interval_secs)
        .bind(defaults.scenes.politician)
        .bind(defaults.scenes.pulp)
        .bind(defaults.scenes.ads)
        .bind(defaults.scenes.terror)
        .execute(self.db.primary())
        .await?;

        if inserted.rows_affected() == 1 {
            info!("created default moderation config");
            return Ok(defaults);
        }

        self.load()
            .await?
            .ok_or_else(|| CensorError::not_found("moderation config"))
    }

    /// Overwrites the policy.
    #[instrument(skip_all, fields(enabled = config.enabled))]
    pub async fn update(&self, config: &ModerationConfig) -> Result<(), CensorError> {
        config.validate()?;

        _ = sqlx::query(
            r#"
            INSERT INTO moderation_config (id, enabled, interval_secs, politician, pulp, ads, terror)
                VALUES (1, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    enabled = excluded.enabled,
                    interval_secs = excluded.interval_secs,
                    politician = excluded.politician,
                    pulp = excluded.pulp,
                    ads = excluded.ads,
                    terror = excluded.terror
            "#,
        )
        .bind(config.enabled)
        .bind(config.interval_secs)
        .bind(config.scenes.politician)
        .bind(config.scenes.pulp)
        .bind(config.scenes.ads)
        .bind(config.scenes.terror)
        .execute(self.db.primary())
        .await?;

        info!("moderation config updated");
        Ok(())
    }

    async fn load(&self) -> Result<Option<ModerationConfig>, CensorError> {
        Ok(sqlx::query_as::<_, ModerationConfig>(
            "SELECT enabled, interval_secs, politician, pulp, ads, terror FROM moderation_config WHERE id = 1",
        )
        .fetch_optional(self.db.primary())
        .await?)
    }
}
