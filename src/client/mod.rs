use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::_typed_codec::{Codec, Json};
use crate::providers::{InstanceInfo, InstanceStatus, ProviderError, ProviderErrorKind};
use crate::runtime::{OrchestrationStatus, Runtime, WaitError};
use crate::{ErrorDetails, Event};

/// Errors returned by [`Client`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// `start_orchestration_with_id` was given an id that is already in use.
    InstanceAlreadyExists(String),
    /// No orchestration with this name is registered on the runtime.
    UnknownOrchestration(String),
    NotFound(String),
    Provider(ProviderError),
    Timeout,
    /// Typed input could not be encoded.
    Encode(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::InstanceAlreadyExists(id) => write!(f, "instance '{id}' already exists"),
            ClientError::UnknownOrchestration(name) => write!(f, "unknown orchestration '{name}'"),
            ClientError::NotFound(id) => write!(f, "instance '{id}' not found"),
            ClientError::Provider(e) => write!(f, "provider error: {e}"),
            ClientError::Timeout => f.write_str("timed out"),
            ClientError::Encode(m) => write!(f, "encode: {m}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ProviderError> for ClientError {
    fn from(e: ProviderError) -> Self {
        ClientError::Provider(e)
    }
}

impl From<WaitError> for ClientError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Timeout => ClientError::Timeout,
            WaitError::Other(m) => ClientError::Provider(ProviderError::permanent("wait_for_orchestration", m)),
        }
    }
}

/// Instance manager: starts orchestrations and observes their state.
///
/// Obtained from [`Runtime::client`]. Cloning is cheap.
#[derive(Clone)]
pub struct Client {
    runtime: Arc<Runtime>,
}

impl Client {
    pub(crate) fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Start an orchestration under a fresh instance id and return that id.
    pub async fn start_orchestration(&self, orchestration: &str, input: impl Into<String>) -> Result<String, ClientError> {
        let instance = uuid::Uuid::new_v4().to_string();
        self.start_orchestration_with_id(&instance, orchestration, input).await?;
        Ok(instance)
    }

    /// Start an orchestration under a caller-chosen instance id.
    pub async fn start_orchestration_with_id(
        &self,
        instance: &str,
        orchestration: &str,
        input: impl Into<String>,
    ) -> Result<(), ClientError> {
        if !self.runtime.orchestrations.has(orchestration) {
            return Err(ClientError::UnknownOrchestration(orchestration.to_string()));
        }
        let info = InstanceInfo::new(instance, orchestration, input);
        match self.runtime.store.create_instance(info).await {
            Ok(()) => {}
            Err(e) if e.kind == ProviderErrorKind::AlreadyExists => {
                return Err(ClientError::InstanceAlreadyExists(instance.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(
            target: "durable_fanout::client",
            instance_id = %instance,
            orchestration_name = %orchestration,
            "orchestration instance created"
        );
        self.runtime.enqueue_tick(instance);
        Ok(())
    }

    /// Start an orchestration with typed input (serialized to JSON).
    pub async fn start_orchestration_typed<In: Serialize>(
        &self,
        orchestration: &str,
        input: &In,
    ) -> Result<String, ClientError> {
        let payload = Json::encode(input).map_err(ClientError::Encode)?;
        self.start_orchestration(orchestration, payload).await
    }

    /// Full stored record of an instance.
    pub async fn get_instance_info(&self, instance: &str) -> Result<Option<InstanceInfo>, ClientError> {
        Ok(self.runtime.store.get_instance(instance).await?)
    }

    pub async fn get_orchestration_status(&self, instance: &str) -> Result<OrchestrationStatus, ClientError> {
        let Some(info) = self.runtime.store.get_instance(instance).await? else {
            return Ok(OrchestrationStatus::NotFound);
        };
        Ok(match info.status {
            InstanceStatus::Pending => OrchestrationStatus::Pending,
            InstanceStatus::Running => OrchestrationStatus::Running,
            InstanceStatus::Completed => OrchestrationStatus::Completed {
                output: info.output.unwrap_or_default(),
            },
            InstanceStatus::Terminated => OrchestrationStatus::Terminated {
                reason: info.output.unwrap_or_default(),
            },
            InstanceStatus::Failed => {
                // Structured details live in history; the record only keeps the rendered message
                let history = self.runtime.store.read(instance).await?;
                let details = history
                    .into_iter()
                    .rev()
                    .find_map(|e| match e {
                        Event::OrchestrationFailed { error } => Some(error),
                        _ => None,
                    })
                    .unwrap_or_else(|| ErrorDetails::orchestration(info.output.unwrap_or_default()));
                OrchestrationStatus::Failed { details }
            }
        })
    }

    /// Poll until the instance is terminal or `timeout` elapses.
    pub async fn wait_for_orchestration(
        &self,
        instance: &str,
        timeout: Duration,
    ) -> Result<OrchestrationStatus, WaitError> {
        let poll = Duration::from_millis(self.runtime.options.wait_poll_interval_ms.max(1));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self
                .get_orchestration_status(instance)
                .await
                .map_err(|e| WaitError::Other(e.to_string()))?;
            if status.is_terminal() {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WaitError::Timeout);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Terminate a running instance. Returns `Ok(false)` if it had already finished.
    pub async fn terminate_instance(&self, instance: &str, reason: impl Into<String>) -> Result<bool, ClientError> {
        let reason = reason.into();
        match self.runtime.terminate(instance, &reason).await {
            Ok(done) => Ok(done),
            Err(e) if e.kind == ProviderErrorKind::NotFound => Err(ClientError::NotFound(instance.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Complete history of an instance in append order.
    pub async fn read_history(&self, instance: &str) -> Result<Vec<Event>, ClientError> {
        Ok(self.runtime.store.read(instance).await?)
    }

    pub async fn list_instances(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.runtime.store.list_instances().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_errors_convert() {
        assert_eq!(ClientError::from(WaitError::Timeout), ClientError::Timeout);
        match ClientError::from(WaitError::Other("x".into())) {
            ClientError::Provider(e) => assert_eq!(e.message, "x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn display_mentions_ids() {
        assert!(ClientError::InstanceAlreadyExists("abc".into()).to_string().contains("abc"));
        assert!(ClientError::UnknownOrchestration("Nope".into()).to_string().contains("Nope"));
    }
}
