//! Outbound collaborators used by the built-in executors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Errors from mail and webhook transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// An address or URL could not be parsed.
    InvalidAddress { address: String },
    /// The remote side refused the message.
    Rejected { reason: String },
    /// The remote side could not be reached.
    Unavailable { reason: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress { address } => write!(f, "invalid address: {address}"),
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
            Self::Unavailable { reason } => write!(f, "unavailable: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A composed email, ready to send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    /// Sender; the transport's default sender when `None`.
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;
}

/// An HTTP call made by the webhook action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    /// Upper-case HTTP method.
    pub method: String,
    pub url: String,
    /// JSON body; not sent for `GET`.
    pub payload: Value,
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Sends the request and returns the response status code.
    async fn send(&self, request: &WebhookRequest) -> Result<u16, TransportError>;
}
