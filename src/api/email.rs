//! Outbound email delivery abstraction.
//!
//! Signup and verification flows dispatch OTP emails through an
//! [`EmailSender`]. Delivery failures propagate as errors so callers can
//! decide: signup fires-and-forgets (the OTP is already durable and can be
//! resent), while forgot-password rolls back its pending reset material.
//!
//! The default sender for local dev is `LogEmailSender`, which logs and
//! returns `Ok(())`. Production deployments configure `HttpEmailSender`,
//! which POSTs the message to an HTTP relay.

use crate::APP_USER_AGENT;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error; failures are never swallowed.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            body = %message.body,
            "email send stub"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Sender that hands messages to an HTTP relay endpoint.
#[derive(Clone, Debug)]
pub struct HttpEmailSender {
    client: Client,
    relay_url: String,
    from: String,
}

impl HttpEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(relay_url: String, from: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build email relay client")?;

        Ok(Self {
            client,
            relay_url,
            from,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let payload = RelayPayload {
            from: &self.from,
            to: &message.to_email,
            subject: &message.subject,
            text: &message.body,
        };

        let response = self
            .client
            .post(&self.relay_url)
            .json(&payload)
            .send()
            .await
            .context("failed to reach email relay")?;

        if !response.status().is_success() {
            return Err(anyhow!("email relay returned {}", response.status()));
        }

        Ok(())
    }
}
