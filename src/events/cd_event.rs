//! Payload published on the CD success topic after a completed deploy.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub application_id: i32,
    pub environment_id: i32,
    pub release_id: i32,
    pub pipeline_override_id: i32,
    pub ci_artifact_id: i32,
    pub trigger_time: NaiveDateTime,
    pub pipeline_materials: Vec<PipelineMaterialCommit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMaterialCommit {
    pub pipeline_material_id: i32,
    pub commit_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_event_serializes_materials() {
        let event = DeploymentEvent {
            application_id: 10,
            environment_id: 4,
            release_id: 12,
            pipeline_override_id: 55,
            ci_artifact_id: 7,
            trigger_time: Utc::now().naive_utc(),
            pipeline_materials: vec![PipelineMaterialCommit {
                pipeline_material_id: 2,
                commit_hash: "abc123".to_string(),
            }],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["pipeline_materials"][0]["commit_hash"], "abc123");
    }
}
