//! Durable async dispatch: accepted deploy requests are serialized to a
//! JetStream work queue keyed by user-deployment-request id; a consumer
//! re-enters the trigger path, retrying only transient backend failures.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::models::UserDeploymentRequest;
use crate::trigger::{DeployRequestDispatcher, TriggerError, TriggerService};

const SUBJECT_PREFIX: &str = "cd.trigger.request";

fn request_subject(user_deployment_request_id: i32) -> String {
    format!("{SUBJECT_PREFIX}.{user_deployment_request_id}")
}

/// JetStream-backed dispatcher. Publication awaits the broker ack so an
/// accepted request is durable before the caller returns.
pub struct NatsDeployDispatcher {
    jetstream: jetstream::Context,
    stream_name: String,
}

impl NatsDeployDispatcher {
    /// Ensure the work-queue stream exists and return the dispatcher.
    #[instrument(skip(client))]
    pub async fn new(client: async_nats::Client, stream_name: &str) -> Result<Self, TriggerError> {
        let jetstream = jetstream::new(client);

        let config = stream::Config {
            name: stream_name.to_string(),
            description: Some("Durable CD deploy requests".to_string()),
            subjects: vec![format!("{SUBJECT_PREFIX}.>")],
            retention: stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };

        match jetstream.get_stream(stream_name).await {
            Ok(_) => debug!(stream = %stream_name, "using existing deploy request stream"),
            Err(_) => {
                debug!(stream = %stream_name, "creating deploy request stream");
                jetstream.create_stream(config).await.map_err(|e| {
                    TriggerError::Internal(format!("deploy request stream create: {e}"))
                })?;
            }
        }

        Ok(Self {
            jetstream,
            stream_name: stream_name.to_string(),
        })
    }
}

#[async_trait]
impl DeployRequestDispatcher for NatsDeployDispatcher {
    async fn dispatch(&self, request: &UserDeploymentRequest) -> Result<(), TriggerError> {
        let subject = request_subject(request.id);
        let payload = serde_json::to_vec(request)
            .map_err(|e| TriggerError::Internal(format!("request encode: {e}")))?;

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| TriggerError::Internal(format!("dispatch publish: {e}")))?
            .await
            .map_err(|e| TriggerError::Internal(format!("dispatch ack: {e}")))?;

        debug!(
            user_deployment_request_id = request.id,
            stream = %self.stream_name,
            %subject,
            "deploy request dispatched"
        );
        Ok(())
    }
}

/// Pull consumer that re-enters the trigger path for each dispatched
/// request. One consumer per process; horizontal scale comes from the
/// work-queue retention.
pub struct DispatchConsumer {
    jetstream: jetstream::Context,
    stream_name: String,
    trigger: Arc<TriggerService>,
}

impl DispatchConsumer {
    pub fn new(
        client: async_nats::Client,
        stream_name: &str,
        trigger: Arc<TriggerService>,
    ) -> Self {
        Self {
            jetstream: jetstream::new(client),
            stream_name: stream_name.to_string(),
            trigger,
        }
    }

    async fn consumer(&self) -> Result<consumer::PullConsumer, TriggerError> {
        let config = consumer::pull::Config {
            name: Some("deploy-request-worker".to_string()),
            durable_name: Some("deploy-request-worker".to_string()),
            ack_wait: Duration::from_secs(300),
            max_deliver: 5,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| TriggerError::Internal(format!("deploy request stream: {e}")))?;
        stream
            .create_consumer(config)
            .await
            .map_err(|e| TriggerError::Internal(format!("deploy request consumer: {e}")))
    }

    /// Consume until the token is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), TriggerError> {
        let consumer = self.consumer().await?;
        info!(stream = %self.stream_name, "deploy request consumer started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("deploy request consumer stopping");
                    return Ok(());
                }
                fetched = self.fetch_one(&consumer) => {
                    if let Err(err) = fetched {
                        warn!(error = %err, "deploy request fetch failed; backing off");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    async fn fetch_one(&self, consumer: &consumer::PullConsumer) -> Result<(), TriggerError> {
        let mut messages = consumer
            .fetch()
            .max_messages(1)
            .expires(Duration::from_secs(5))
            .messages()
            .await
            .map_err(|e| TriggerError::Internal(format!("deploy request fetch: {e}")))?;

        let Some(Ok(message)) = messages.next().await else {
            return Ok(());
        };

        let request: UserDeploymentRequest = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(err) => {
                error!(error = %err, "undecodable deploy request; dropping");
                message.ack().await.ok();
                return Ok(());
            }
        };

        self.process(request, message).await;
        Ok(())
    }

    async fn process(&self, request: UserDeploymentRequest, message: jetstream::Message) {
        let cancel = CancellationToken::new();
        match self
            .trigger
            .trigger_release_by_request_id(request.id, &cancel)
            .await
        {
            Ok(outcome) => {
                debug!(
                    user_deployment_request_id = request.id,
                    ?outcome,
                    "dispatched deploy completed"
                );
                message.ack().await.ok();
            }
            Err(err) if err.is_retryable() => {
                warn!(
                    user_deployment_request_id = request.id,
                    error = %err,
                    "transient deploy failure; redelivering"
                );
                message
                    .ack_with(AckKind::Nak(Some(Duration::from_secs(10))))
                    .await
                    .ok();
            }
            Err(err) => {
                error!(
                    user_deployment_request_id = request.id,
                    error = %err,
                    "deploy failed permanently"
                );
                message.ack().await.ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_keyed_by_request_id() {
        assert_eq!(request_subject(42), "cd.trigger.request.42");
    }
}
