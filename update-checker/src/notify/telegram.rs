use super::{Notifier, SendError};
use crate::error::CheckerError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

/// Telegram refuses longer message texts.
const MAX_MESSAGE_CHARS: usize = 4096;
const TRUNCATION_MARK: &str = "\n...";

/// Pushes notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: &str,
        timeout: Duration,
        proxy: Option<&Url>,
    ) -> Result<Self, CheckerError> {
        let mut builder = Client::builder().timeout(timeout).no_proxy();
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: format!("https://api.telegram.org/bot{bot_token}/sendMessage"),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), SendError> {
        if text.trim().is_empty() {
            return Err(SendError::Permanent("empty message".to_owned()));
        }

        let text = fit_message(text);
        let payload = TelegramMessage {
            chat_id: destination,
            text: &text,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        let reason = format!("Telegram API returned {status}: {error_body}");

        if status.as_u16() == 429 || status.is_server_error() {
            Err(SendError::Transient(reason))
        } else {
            Err(SendError::Permanent(reason))
        }
    }
}

/// Cut `text` down to the message size limit, marking the cut. Long
/// changelogs sit at the end of a message, so the head is what survives.
fn fit_message(text: &str) -> Cow<'_, str> {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return Cow::Borrowed(text);
    }

    let keep = MAX_MESSAGE_CHARS - TRUNCATION_MARK.chars().count();
    let mut fitted: String = text.chars().take(keep).collect();
    fitted.push_str(TRUNCATION_MARK);
    Cow::Owned(fitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_messages_are_rejected_without_sending() {
        let notifier = TelegramNotifier::new("123:abc", Duration::from_secs(1), None).unwrap();

        let err = notifier.deliver("@chan", "  ").await.unwrap_err();
        assert!(matches!(err, SendError::Permanent(_)));
    }

    #[test]
    fn long_messages_are_truncated_to_the_limit() {
        let text = format!("Magisk\nVersion: v28.0\n{}", "ä".repeat(MAX_MESSAGE_CHARS));

        let fitted = fit_message(&text);

        assert_eq!(fitted.chars().count(), MAX_MESSAGE_CHARS);
        assert!(fitted.starts_with("Magisk\nVersion: v28.0\n"));
        assert!(fitted.ends_with(TRUNCATION_MARK));
    }

    #[test]
    fn short_messages_are_sent_unchanged() {
        let text = "x".repeat(MAX_MESSAGE_CHARS);
        assert!(matches!(fit_message(&text), Cow::Borrowed(t) if t == text));
    }

    #[test]
    fn endpoint_embeds_the_token() {
        let notifier = TelegramNotifier::new("123:abc", Duration::from_secs(1), None).unwrap();
        assert_eq!(
            notifier.endpoint,
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
