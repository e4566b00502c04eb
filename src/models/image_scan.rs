//! Image scan results and the scan-deployed mapping written on trigger.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// Sentinel history id recorded when scanning is disabled for the artifact.
pub const SCAN_DISABLED_HISTORY_ID: i32 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ImageScanHistory {
    pub id: i32,
    pub image: String,
    pub image_hash: String,
    pub executed_on: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CveSeverityCount {
    pub severity: i32,
    pub count: i64,
}

pub struct ImageScanStore {
    pool: PgPool,
}

impl ImageScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn latest_history_for_digest(
        &self,
        image_digest: &str,
    ) -> Result<Option<ImageScanHistory>, sqlx::Error> {
        sqlx::query_as::<_, ImageScanHistory>(
            r#"
            SELECT id, image, image_hash, executed_on
            FROM image_scan_execution_history
            WHERE image_hash = $1
            ORDER BY executed_on DESC
            LIMIT 1
            "#,
        )
        .bind(image_digest)
        .fetch_optional(&self.pool)
        .await
    }

    /// Blocked CVEs for the digest after applying the environment's policy,
    /// grouped by severity. Non-empty means the image is blocked.
    pub async fn blocked_cve_counts(
        &self,
        image_digest: &str,
        environment_id: i32,
        app_id: i32,
    ) -> Result<Vec<CveSeverityCount>, sqlx::Error> {
        sqlx::query_as::<_, CveSeverityCount>(
            r#"
            SELECT cs.severity AS severity, COUNT(*) AS count
            FROM image_scan_execution_result r
            JOIN image_scan_execution_history h ON h.id = r.image_scan_execution_history_id
            JOIN cve_store cs ON cs.name = r.cve_store_name
            JOIN cve_policy_control p ON p.severity = cs.severity
            WHERE h.image_hash = $1
              AND p.action = 'block'
              AND (p.env_id IS NULL OR p.env_id = $2)
              AND (p.app_id IS NULL OR p.app_id = $3)
              AND p.deleted = false
            GROUP BY cs.severity
            "#,
        )
        .bind(image_digest)
        .bind(environment_id)
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Record where a scanned image got deployed. `scan_history_id` is the
    /// latest execution history id, or [`SCAN_DISABLED_HISTORY_ID`] when the
    /// artifact has scanning off.
    pub async fn mark_image_scan_deployed(
        &self,
        scan_history_id: i32,
        environment_id: i32,
        pipeline_id: i32,
        image: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO image_scan_deploy_info
                (image_scan_execution_history_id, env_id, object_id, object_type, image, created_at)
            VALUES ($1, $2, $3, 'app', $4, NOW())
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(scan_history_id)
        .bind(environment_id)
        .bind(pipeline_id)
        .bind(image)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
