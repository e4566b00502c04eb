//! CI artifacts (deployable images) and their git material info.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// Data sources as persisted. `ext` and the empty string are the deprecated
/// forms that get migrated to the webhook source on read.
pub mod data_source {
    pub const GIT: &str = "GIT";
    pub const WEBHOOK: &str = "WEBHOOK";
    pub const PRE_CD: &str = "pre_cd";
    pub const POST_CD: &str = "post_cd";
    pub const EXT: &str = "ext";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CiArtifact {
    pub id: i32,
    pub pipeline_id: Option<i32>,
    pub image: String,
    pub image_digest: String,
    pub material_info: Option<String>,
    pub data_source: String,
    pub workflow_id: Option<i32>,
    pub parent_ci_artifact: Option<i32>,
    pub scanned: bool,
    pub scan_enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// One git material as recorded on the artifact at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiMaterialInfo {
    #[serde(default)]
    pub material: MaterialRef,
    #[serde(default)]
    pub modifications: Vec<Modification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRef {
    #[serde(default)]
    pub git_configuration: GitConfiguration,
    #[serde(default, rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitConfiguration {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub modified_time: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub message: String,
}

impl CiArtifact {
    pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<CiArtifact>, sqlx::Error> {
        sqlx::query_as::<_, CiArtifact>(
            r#"
            SELECT id, pipeline_id, image, image_digest, material_info, data_source,
                   workflow_id, parent_ci_artifact, scanned, scan_enabled,
                   created_at, updated_at
            FROM ci_artifact WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Deprecated data sources are rewritten to WEBHOOK the first time the
    /// artifact is fetched for a trigger.
    pub fn is_migration_required(&self) -> bool {
        self.data_source == data_source::EXT || self.data_source.is_empty()
    }

    pub async fn migrate_to_webhook_data_source(
        pool: &PgPool,
        artifact_id: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE ci_artifact SET data_source = $2, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(artifact_id)
        .bind(data_source::WEBHOOK)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Material info is stored as a JSON array; older rows store a single
    /// object, accepted here as well.
    pub fn parse_material_info(&self) -> Result<Vec<CiMaterialInfo>, serde_json::Error> {
        let raw = match self.material_info.as_deref() {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(Vec::new()),
        };
        match serde_json::from_str::<Vec<CiMaterialInfo>>(raw) {
            Ok(list) => Ok(list),
            Err(_) => serde_json::from_str::<CiMaterialInfo>(raw).map(|one| vec![one]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn artifact(data_source: &str, material_info: Option<&str>) -> CiArtifact {
        let now = Utc::now().naive_utc();
        CiArtifact {
            id: 7,
            pipeline_id: Some(3),
            image: "registry.example.com/app:abc123".to_string(),
            image_digest: "sha256:deadbeef".to_string(),
            material_info: material_info.map(|s| s.to_string()),
            data_source: data_source.to_string(),
            workflow_id: Some(11),
            parent_ci_artifact: None,
            scanned: true,
            scan_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_migration_required_for_deprecated_sources() {
        assert!(artifact(data_source::EXT, None).is_migration_required());
        assert!(artifact("", None).is_migration_required());
        assert!(!artifact(data_source::GIT, None).is_migration_required());
        assert!(!artifact(data_source::WEBHOOK, None).is_migration_required());
    }

    #[test]
    fn test_parse_material_info_array_and_single_object() {
        let as_array = r#"[{"material":{"gitConfiguration":{"url":"https://github.com/acme/app.git"},"type":"SOURCE_TYPE_BRANCH_FIXED","value":"main"},"modifications":[{"revision":"abc123"}]}]"#;
        let parsed = artifact(data_source::GIT, Some(as_array))
            .parse_material_info()
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].modifications[0].revision, "abc123");

        let as_object = r#"{"material":{"value":"main"},"modifications":[]}"#;
        let parsed = artifact(data_source::GIT, Some(as_object))
            .parse_material_info()
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].material.value, "main");

        assert!(artifact(data_source::GIT, None)
            .parse_material_info()
            .unwrap()
            .is_empty());
    }
}
