//! Environments and their clusters.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Environment {
    pub id: i32,
    pub name: String,
    pub namespace: String,
    pub cluster_id: i32,
    pub is_production: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Environment {
    pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<Environment>, sqlx::Error> {
        sqlx::query_as::<_, Environment>(
            r#"
            SELECT id, name, namespace, cluster_id, is_production, created_at, updated_at
            FROM environment WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Cluster {
    pub id: i32,
    pub cluster_name: String,
    pub server_url: String,
    pub insecure_skip_tls_verify: bool,
    pub bearer_token: Option<String>,
    pub tls_key: Option<String>,
    pub cert_data: Option<String>,
    pub ca_data: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Cluster {
    pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<Cluster>, sqlx::Error> {
        sqlx::query_as::<_, Cluster>(
            r#"
            SELECT id, cluster_name, server_url, insecure_skip_tls_verify, bearer_token,
                   tls_key, cert_data, ca_data, created_at, updated_at
            FROM cluster WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// gRPC cluster config for the Helm controller. TLS material is only
    /// attached when verification is on.
    pub fn grpc_config(&self) -> ClusterGrpcConfig {
        let mut config = ClusterGrpcConfig {
            cluster_name: self.cluster_name.clone(),
            api_server_url: self.server_url.clone(),
            token: self.bearer_token.clone().unwrap_or_default(),
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
            key_data: None,
            cert_data: None,
            ca_data: None,
        };
        if !self.insecure_skip_tls_verify {
            config.key_data = self.tls_key.clone();
            config.cert_data = self.cert_data.clone();
            config.ca_data = self.ca_data.clone();
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGrpcConfig {
    pub cluster_name: String,
    pub api_server_url: String,
    pub token: String,
    pub insecure_skip_tls_verify: bool,
    pub key_data: Option<String>,
    pub cert_data: Option<String>,
    pub ca_data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cluster(skip_tls: bool) -> Cluster {
        let now = Utc::now().naive_utc();
        Cluster {
            id: 1,
            cluster_name: "prod-cluster".to_string(),
            server_url: "https://10.0.0.1:6443".to_string(),
            insecure_skip_tls_verify: skip_tls,
            bearer_token: Some("token".to_string()),
            tls_key: Some("key".to_string()),
            cert_data: Some("cert".to_string()),
            ca_data: Some("ca".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_grpc_config_tls_material_only_when_verifying() {
        let config = cluster(true).grpc_config();
        assert!(config.key_data.is_none());
        assert!(config.ca_data.is_none());

        let config = cluster(false).grpc_config();
        assert_eq!(config.key_data.as_deref(), Some("key"));
        assert_eq!(config.cert_data.as_deref(), Some("cert"));
        assert_eq!(config.ca_data.as_deref(), Some("ca"));
    }
}
