//! SMTP mail sender.

use crate::config::SmtpConfig;
use async_trait::async_trait;
use keel_workflow::{MailSender, OutgoingMail, TransportError};
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::{PoolConfig, authentication::Credentials};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, warn};

/// Sends workflow mail through a pooled SMTP relay.
#[derive(Clone)]
pub struct SmtpMailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailSender {
    pub fn new(config: &SmtpConfig) -> Self {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Self {
            transport: builder.build(),
            from_address: config.from_address.clone(),
        }
    }
}

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse::<Mailbox>()
        .map_err(|_| TransportError::InvalidAddress {
            address: address.to_string(),
        })
}

/// Composes a plain-text message, falling back to `default_from`.
fn build_message(default_from: &str, mail: &OutgoingMail) -> Result<Message, TransportError> {
    let from = mail.from.as_deref().unwrap_or(default_from);
    let mut builder = Message::builder()
        .from(mailbox(from)?)
        .subject(mail.subject.as_str())
        .header(ContentType::TEXT_PLAIN);
    for to in &mail.to {
        builder = builder.to(mailbox(to)?);
    }
    for cc in &mail.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &mail.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }

    builder
        .body(mail.body.clone())
        .map_err(|e| TransportError::Rejected {
            reason: e.to_string(),
        })
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let message = build_message(&self.from_address, mail)?;

        match self.transport.send(message).await {
            Ok(_) => {
                debug!(recipients = mail.to.len(), subject = %mail.subject, "mail sent");
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                warn!(error = %e, "mail rejected by relay");
                Err(TransportError::Rejected {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(TransportError::Unavailable {
                reason: e.to_string(),
            }),
        }
    }
}
