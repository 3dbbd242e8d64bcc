//! Feature-flag repository: the single client flags row.

use rusqlite::{Connection, OptionalExtension, params};

use velocity_core::FeatureFlags;

use crate::errors::Result;

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeatureFlags> {
    Ok(FeatureFlags {
        enable_live_streams: row.get("enable_live_streams")?,
        enable_icloud_storage: row.get("enable_icloud_storage")?,
        enable_car_play: row.get("enable_carplay")?,
    })
}

/// Feature-flag repository. Stateless, every method takes `&Connection`.
pub struct FeatureFlagRepo;

impl FeatureFlagRepo {
    /// Stored flags, or all-false defaults when no row exists.
    pub fn get(conn: &Connection) -> Result<FeatureFlags> {
        let flags = conn
            .query_row("SELECT * FROM feature_flags WHERE id = 1", [], map_row)
            .optional()?;
        Ok(flags.unwrap_or_default())
    }

    /// Insert or replace the flags row.
    pub fn upsert(conn: &Connection, flags: &FeatureFlags) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO feature_flags (id, enable_live_streams, enable_icloud_storage, enable_carplay)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
               enable_live_streams = excluded.enable_live_streams,
               enable_icloud_storage = excluded.enable_icloud_storage,
               enable_carplay = excluded.enable_carplay",
            params![
                flags.enable_live_streams,
                flags.enable_icloud_storage,
                flags.enable_car_play
            ],
        )?;
        Ok(())
    }
}
