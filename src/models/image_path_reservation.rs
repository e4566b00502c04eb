//! Reservations of destination image paths for the copy-container-image
//! plugin. A path may only be reserved once across pipelines.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::constants::messages;
use crate::error::{DeployError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ImagePathReservation {
    pub id: i32,
    pub image_path: String,
    pub custom_tag_id: i32,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

impl ImagePathReservation {
    /// Reserve a destination path. The claim is a single insert against the
    /// unique partial index on (image_path) WHERE active, so two concurrent
    /// triggers cannot both win; the loser re-reads the holder and either
    /// reuses it (same custom tag) or surfaces a validation failure.
    pub async fn reserve(
        pool: &PgPool,
        image_path: &str,
        custom_tag_id: i32,
    ) -> Result<ImagePathReservation> {
        let inserted = sqlx::query_as::<_, ImagePathReservation>(
            r#"
            INSERT INTO image_path_reservation (image_path, custom_tag_id, active, created_at)
            VALUES ($1, $2, true, NOW())
            ON CONFLICT (image_path) WHERE active = true DO NOTHING
            RETURNING id, image_path, custom_tag_id, active, created_at
            "#,
        )
        .bind(image_path)
        .bind(custom_tag_id)
        .fetch_optional(pool)
        .await?;

        if let Some(reservation) = inserted {
            return Ok(reservation);
        }

        let holder = sqlx::query_as::<_, ImagePathReservation>(
            r#"
            SELECT id, image_path, custom_tag_id, active, created_at
            FROM image_path_reservation
            WHERE image_path = $1 AND active = true
            "#,
        )
        .bind(image_path)
        .fetch_optional(pool)
        .await?;

        match holder {
            Some(existing) if existing.custom_tag_id == custom_tag_id => Ok(existing),
            _ => Err(DeployError::ValidationError(
                messages::IMAGE_PATH_ALREADY_IN_USE.to_string(),
            )),
        }
    }

    /// Deactivate reservations when a runner is cancelled or its stage fails.
    pub async fn deactivate(pool: &PgPool, ids: &[i32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"UPDATE image_path_reservation SET active = false WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .execute(pool)
        .await?;
        Ok(())
    }
}
