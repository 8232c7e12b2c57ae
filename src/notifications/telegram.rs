/// Telegram Bot API delivery
use super::{DeliveryChannel, Message, Recipient};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

#[derive(Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
}

impl TelegramChannel {
    pub fn new(client: reqwest::Client, api_url: &str, bot_token: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        }
    }

    /// `sendMessage` with HTML formatting
    pub async fn send_message(&self, chat_id: i64, html: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": html,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .context("sendMessage request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("sendMessage returned {}: {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn accepts(&self, recipient: &Recipient) -> bool {
        recipient.telegram_id.is_some()
    }

    async fn deliver(&self, recipient: &Recipient, message: &Message) -> anyhow::Result<()> {
        let chat_id = recipient
            .telegram_id
            .context("recipient has no telegram chat")?;
        self.send_message(chat_id, &message.html_body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    async fn spawn_bot_api(captured: Arc<Mutex<Vec<serde_json::Value>>>) -> String {
        let app = Router::new().route(
            "/:bot/sendMessage",
            post(move |Path(bot): Path<String>, Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    if bot != "bottest-token" {
                        return StatusCode::UNAUTHORIZED;
                    }
                    captured.lock().unwrap().push(body);
                    StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_send_message_payload() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let api_url = spawn_bot_api(captured.clone()).await;
        let channel = TelegramChannel::new(reqwest::Client::new(), &api_url, "test-token");

        channel.send_message(777, "<b>hi</b>").await.unwrap();

        let bodies = captured.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["chat_id"], 777);
        assert_eq!(bodies[0]["parse_mode"], "HTML");
        assert_eq!(bodies[0]["text"], "<b>hi</b>");
    }

    #[tokio::test]
    async fn test_rejected_token_is_an_error() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let api_url = spawn_bot_api(captured).await;
        let channel = TelegramChannel::new(reqwest::Client::new(), &api_url, "wrong");
        assert!(channel.send_message(1, "x").await.is_err());
    }
}
