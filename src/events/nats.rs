//! NATS-backed event writer. Success events are fire-and-forget; a publish
//! failure is reported, never surfaced to the trigger.

use async_trait::async_trait;

use crate::error::{DeployError, Result};

#[async_trait]
pub trait EventWriter: Send + Sync {
    async fn write(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

pub struct NatsEventWriter {
    client: async_nats::Client,
}

impl NatsEventWriter {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| DeployError::EventError(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventWriter for NatsEventWriter {
    async fn write(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| DeployError::EventError(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| DeployError::EventError(e.to_string()))?;
        Ok(())
    }
}
