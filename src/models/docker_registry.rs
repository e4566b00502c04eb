//! Container registry credentials used when a stage pushes images to
//! destinations outside the build registry.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DockerRegistry {
    pub id: String,
    pub registry_url: String,
    pub username: String,
    pub password: String,
    pub active: bool,
}

impl DockerRegistry {
    /// Active registries matching the given hosts. Destinations pointing at
    /// an unknown registry simply get no credentials.
    pub async fn find_by_urls(
        pool: &PgPool,
        registry_urls: &[String],
    ) -> Result<Vec<DockerRegistry>, sqlx::Error> {
        if registry_urls.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, DockerRegistry>(
            r#"
            SELECT id, registry_url, username, password, active
            FROM docker_artifact_store
            WHERE registry_url = ANY($1) AND active = true
            ORDER BY id
            "#,
        )
        .bind(registry_urls)
        .fetch_all(pool)
        .await
    }
}
