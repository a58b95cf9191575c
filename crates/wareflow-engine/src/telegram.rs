//! Telegram Bot API notifier

#![allow(clippy::result_large_err)]

use crate::config::TelegramConfig;
use reqwest::blocking::Client;
use std::time::Duration;
use wareflow_core::errors::{ExError, ExErrorKind};
use wareflow_core::notify::Notifier;
use wareflow_core_types::Sensitive;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends status text through `GET /bot<token>/sendMessage`
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: Sensitive<String>,
    chat_id: String,
}

impl TelegramNotifier {
    /// # Errors
    ///
    /// `Internal` if the HTTP client cannot be built.
    pub fn new(config: &TelegramConfig) -> Result<Self, ExError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                ExError::new(ExErrorKind::Internal)
                    .with_op("telegram_notify")
                    .with_message(format!("cannot build HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, text: &str) -> Result<(), ExError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token.expose());
        let response = self
            .client
            .get(url)
            .query(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExError::new(ExErrorKind::ExternalService)
                .with_op("telegram_notify")
                .with_message(format!("sendMessage returned {}: {}", status, body)));
        }
        Ok(())
    }
}

/// The request URL carries the bot token, so it is stripped from the error
fn http_error(err: reqwest::Error) -> ExError {
    let kind = if err.is_timeout() || err.is_connect() {
        ExErrorKind::TransientIo
    } else {
        ExErrorKind::ExternalService
    };
    ExError::new(kind)
        .with_op("telegram_notify")
        .with_message(err.without_url().to_string())
}
