//! HTTP delivery of variable writes to slaves.

use crate::control::{ControlReply, VariableRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ring_core::{NodeId, PushError, VariablePush};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Pushes values with `POST {slave}/variable`.
#[derive(Debug, Clone)]
pub struct HttpPusher {
    client: reqwest::Client,
}

impl HttpPusher {
    /// `timeout` bounds each push, connect included.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl VariablePush for HttpPusher {
    async fn push(
        &self,
        slave: &NodeId,
        value: Option<&Value>,
        from: &NodeId,
    ) -> Result<(), PushError> {
        let url = format!("{}/variable", slave.http_url());
        let body = VariableRequest {
            variable: value.cloned(),
            from_id: Some(from.clone()),
        };
        debug!("Pushing variable to {}", url);

        let unreachable = |e: reqwest::Error| PushError::Unreachable {
            slave: slave.clone(),
            reason: e.to_string(),
        };
        let reply: ControlReply = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(unreachable)?
            .json()
            .await
            .map_err(unreachable)?;

        if reply.success {
            Ok(())
        } else {
            Err(PushError::Rejected {
                slave: slave.clone(),
                reason: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}
