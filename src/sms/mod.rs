//! Outbound SMS delivery.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::SmsConfig;
use crate::error::SmsError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone_number: &str, body: &str) -> Result<(), SmsError>;
}

/// Twilio Programmable SMS client.
#[derive(Debug, Clone)]
pub struct TwilioSmsSender {
    client: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base_url: String,
}

impl TwilioSmsSender {
    pub fn new(config: &SmsConfig) -> Result<Self, SmsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url, self.account_sid
        )
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send(&self, phone_number: &str, body: &str) -> Result<(), SmsError> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() || self.from_number.is_empty() {
            return Err(SmsError::NotConfigured);
        }

        let form = [
            ("To", phone_number),
            ("From", self.from_number.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(phone_number, "SMS accepted by Twilio");
            return Ok(());
        }

        let error_body = response.text().await.unwrap_or_default();
        error!(phone_number, status = status.as_u16(), error_body = %error_body, "Twilio rejected SMS");
        Err(SmsError::Rejected { status: status.as_u16() })
    }
}
