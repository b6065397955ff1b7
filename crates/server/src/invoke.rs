//! Outbound operation calls to service instances.
//!
//! The invoker is the seam between the workflow engine and the network:
//! the engine owns timeouts, retries, and breaker accounting; the
//! invoker only places one call and reports what happened.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use conductor_core::ServiceInstance;

/// A single invocation attempt failed.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The instance answered with a non-success status.
    #[error("operation returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for the error message.
        body: String,
    },
    /// The call never completed (connect failure, reset, DNS).
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Places one operation call against one instance.
#[async_trait]
pub trait ServiceInvoker: Send + Sync + 'static {
    /// Invokes `operation` on `instance` with resolved parameters,
    /// returning the operation's JSON result.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError`] when the call fails or the instance
    /// reports an error status.
    async fn invoke(
        &self,
        instance: &ServiceInstance,
        operation: &str,
        parameters: &Value,
    ) -> Result<Value, InvokeError>;
}

/// HTTP invoker: `POST {base_url}/ops/{operation}` with a JSON body.
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    /// Builds an invoker. The client carries no overall timeout; the
    /// engine wraps each attempt in the step's own deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ServiceInvoker for HttpInvoker {
    async fn invoke(
        &self,
        instance: &ServiceInstance,
        operation: &str,
        parameters: &Value,
    ) -> Result<Value, InvokeError> {
        let url = format!(
            "{}/ops/{operation}",
            instance.base_url.trim_end_matches('/')
        );
        debug!(instance_id = %instance.instance_id, operation, "invoking operation");

        let response = self
            .client
            .post(&url)
            .json(parameters)
            .send()
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Char-based cut; byte truncate could split a UTF-8 boundary.
            let detail: String = body.chars().take(512).collect();
            return Err(InvokeError::Status {
                status: status.as_u16(),
                body: detail,
            });
        }

        // Operations with empty or non-JSON bodies yield Null so later
        // steps can still reference the step as having produced output.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}
