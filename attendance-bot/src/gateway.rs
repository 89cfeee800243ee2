//! Outbound chat seam
//!
//! The core workflow never talks to the chat transport directly. Forwarding
//! evidence to reviewers, deleting the forwarded copy and notifying users all
//! go through [`ChatGateway`], so a transport adapter can be plugged in and
//! tests can record deliveries.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tracing::info;

/// Delivery failure reported by a gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Message not found: chat={chat_id} message={message_id}")]
    MessageNotFound { chat_id: i64, message_id: i64 },
}

/// Evidence artifact (video note) as referenced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceArtifact {
    /// Opaque transport file reference
    pub file_id: String,
}

/// Inline control attached to a forwarded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlButton {
    pub label: String,
    /// Callback data delivered back on press
    pub data: String,
}

/// Outbound delivery operations used by the workflow
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Forward an evidence artifact with a caption and decision controls
    ///
    /// **Returns:** message id of the forwarded copy in `chat_id`
    async fn forward_evidence(
        &self,
        chat_id: i64,
        artifact: &EvidenceArtifact,
        caption: &str,
        controls: &[ControlButton],
    ) -> Result<i64, GatewayError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), GatewayError>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError>;
}

/// Gateway that only logs deliveries
///
/// Used when no transport adapter is attached. Forwarded messages get
/// increasing synthetic ids.
#[derive(Debug, Default)]
pub struct LogOnlyGateway {
    next_message_id: AtomicI64,
}

impl LogOnlyGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatGateway for LogOnlyGateway {
    async fn forward_evidence(
        &self,
        chat_id: i64,
        artifact: &EvidenceArtifact,
        caption: &str,
        controls: &[ControlButton],
    ) -> Result<i64, GatewayError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        let controls: Vec<&str> = controls.iter().map(|c| c.data.as_str()).collect();
        info!(
            chat_id,
            message_id,
            file_id = %artifact.file_id,
            ?controls,
            "Forward evidence: {}",
            caption.replace('\n', " | ")
        );
        Ok(message_id)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), GatewayError> {
        info!(chat_id, message_id, "Delete message");
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        info!(chat_id, "Send message: {}", text.replace('\n', " | "));
        Ok(())
    }
}
