//! Telegram delivery adapter.
//!
//! Speaks the Bot API `sendMessage` endpoint directly: the inline copy-text
//! button is the whole point of this sink, so the payload is built by hand
//! rather than through a client library. The fallback strategy swaps only
//! the button action (copy → share link) and never retries past that.

use std::time::Duration;

use async_trait::async_trait;

use otpcast_core::{
    domain::DeliveryReceipt,
    errors::Error,
    ports::DeliveryPort,
    Result,
};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// The one inline button's action. Label and position are identical for
/// both shapes; only the action type differs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    /// `copy_text`: copies the code to the user's clipboard.
    Copy,
    /// Plain share-link carrying the same value, for API/client combinations
    /// that reject `copy_text`.
    Link,
}

#[derive(Clone, Debug)]
pub struct TelegramDelivery {
    api_base: String,
    bot_token: String,
    http: reqwest::Client,
}

impl TelegramDelivery {
    pub fn new(bot_token: impl Into<String>, send_timeout: Duration) -> Self {
        Self::with_api_base(TELEGRAM_API, bot_token, send_timeout)
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        send_timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(send_timeout)
            .build()
            .expect("reqwest client build");
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            http,
        }
    }

    async fn send(
        &self,
        chat_id: &str,
        text: &str,
        copy_value: &str,
        action: ButtonAction,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = send_message_payload(chat_id, text, copy_value, action);

        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Delivery {
                destination: chat_id.to_string(),
                reason: format!("send request error: {e}"),
            })?;

        resp.json().await.map_err(|e| Error::Delivery {
            destination: chat_id.to_string(),
            reason: format!("send response error: {e}"),
        })
    }
}

#[async_trait]
impl DeliveryPort for TelegramDelivery {
    async fn deliver(
        &self,
        chat_id: &str,
        text: &str,
        copy_value: &str,
    ) -> Result<DeliveryReceipt> {
        let first = self.send(chat_id, text, copy_value, ButtonAction::Copy).await?;
        if is_ok(&first) {
            return Ok(receipt_from_body(&first));
        }

        // One fallback with the link-action button, then give up.
        let second = self.send(chat_id, text, copy_value, ButtonAction::Link).await?;
        if is_ok(&second) {
            return Ok(receipt_from_body(&second));
        }

        Err(Error::Delivery {
            destination: chat_id.to_string(),
            reason: describe_failure(&second),
        })
    }
}

/// Build the `sendMessage` payload. Both button shapes are produced here so
/// the fallback is a declared capability switch, not duplicated request
/// construction.
pub fn send_message_payload(
    chat_id: &str,
    text: &str,
    copy_value: &str,
    action: ButtonAction,
) -> serde_json::Value {
    let button = match action {
        ButtonAction::Copy => serde_json::json!({
            "text": copy_value,
            "style": "success",
            "copy_text": { "text": copy_value },
        }),
        ButtonAction::Link => serde_json::json!({
            "text": copy_value,
            "style": "success",
            "url": format!("https://t.me/share/url?url={copy_value}"),
        }),
    };

    serde_json::json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "MarkdownV2",
        "reply_markup": { "inline_keyboard": [[button]] },
        "disable_web_page_preview": true,
    })
}

fn is_ok(body: &serde_json::Value) -> bool {
    body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
}

fn receipt_from_body(body: &serde_json::Value) -> DeliveryReceipt {
    DeliveryReceipt {
        message_id: body
            .get("result")
            .and_then(|r| r.get("message_id"))
            .and_then(|id| id.as_i64()),
    }
}

fn describe_failure(body: &serde_json::Value) -> String {
    body.get("description")
        .and_then(|d| d.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn payload_carries_markup_and_copy_button() {
        let p = send_message_payload("-100123", "*hi*", "12-3456", ButtonAction::Copy);
        assert_eq!(p["chat_id"], "-100123");
        assert_eq!(p["parse_mode"], "MarkdownV2");
        assert_eq!(p["disable_web_page_preview"], true);

        let button = &p["reply_markup"]["inline_keyboard"][0][0];
        assert_eq!(button["text"], "12-3456");
        assert_eq!(button["copy_text"]["text"], "12-3456");
        assert!(button.get("url").is_none());
    }

    #[test]
    fn fallback_payload_swaps_only_the_action() {
        let copy = send_message_payload("-100123", "*hi*", "4321", ButtonAction::Copy);
        let link = send_message_payload("-100123", "*hi*", "4321", ButtonAction::Link);

        // Everything but the keyboard is identical.
        for key in ["chat_id", "text", "parse_mode", "disable_web_page_preview"] {
            assert_eq!(copy[key], link[key], "field {key} must not change");
        }

        let button = &link["reply_markup"]["inline_keyboard"][0][0];
        assert_eq!(button["text"], "4321", "label preserved");
        assert_eq!(button["url"], "https://t.me/share/url?url=4321");
        assert!(button.get("copy_text").is_none());
    }

    /// Minimal one-response-per-connection HTTP server; records request
    /// bodies so tests can inspect what was actually posted.
    async fn spawn_server(responses: Vec<&'static str>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let recorded = bodies.clone();

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let Ok(n) = sock.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(body) = parse_request_body(&buf) {
                        recorded.lock().unwrap().push(body);
                        break;
                    }
                }
                let out = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response}",
                    response.len(),
                );
                let _ = sock.write_all(out.as_bytes()).await;
            }
        });

        (format!("http://{addr}"), bodies)
    }

    fn parse_request_body(buf: &[u8]) -> Option<String> {
        let headers_end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
        let headers = String::from_utf8_lossy(&buf[..headers_end]);
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.to_lowercase().strip_prefix("content-length:").map(str::to_string))
            .and_then(|v| v.trim().parse().ok())?;
        if buf.len() < headers_end + content_length {
            return None;
        }
        Some(String::from_utf8_lossy(&buf[headers_end..headers_end + content_length]).to_string())
    }

    #[tokio::test]
    async fn successful_primary_send_is_single_attempt() {
        let (base, bodies) =
            spawn_server(vec![r#"{"ok":true,"result":{"message_id":7}}"#]).await;
        let client = TelegramDelivery::with_api_base(base, "tok", Duration::from_secs(5));

        let receipt = client.deliver("-100", "*hi*", "4321").await.unwrap();
        assert_eq!(receipt.message_id, Some(7));

        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("copy_text"));
    }

    #[tokio::test]
    async fn rejected_copy_button_falls_back_to_link_exactly_once() {
        let (base, bodies) = spawn_server(vec![
            r#"{"ok":false,"description":"BUTTON_TYPE_INVALID"}"#,
            r#"{"ok":true,"result":{"message_id":8}}"#,
        ])
        .await;
        let client = TelegramDelivery::with_api_base(base, "tok", Duration::from_secs(5));

        let receipt = client.deliver("-100", "*hi*", "12-3456").await.unwrap();
        assert_eq!(receipt.message_id, Some(8));

        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 2, "exactly one fallback, never a third send");
        assert!(bodies[0].contains("copy_text"));
        assert!(bodies[1].contains("https://t.me/share/url?url=12-3456"));
        assert!(!bodies[1].contains("copy_text"));
    }

    #[tokio::test]
    async fn rejected_fallback_is_a_delivery_error() {
        let (base, bodies) = spawn_server(vec![
            r#"{"ok":false,"description":"nope"}"#,
            r#"{"ok":false,"description":"still nope"}"#,
        ])
        .await;
        let client = TelegramDelivery::with_api_base(base, "tok", Duration::from_secs(5));

        let err = client.deliver("-100", "*hi*", "4321").await.unwrap_err();
        assert!(matches!(err, Error::Delivery { .. }));
        assert!(err.to_string().contains("still nope"));
        assert_eq!(bodies.lock().unwrap().len(), 2);
    }

    #[test]
    fn response_parsing() {
        let ok = serde_json::json!({ "ok": true, "result": { "message_id": 42 } });
        assert!(is_ok(&ok));
        assert_eq!(receipt_from_body(&ok).message_id, Some(42));

        let rejected = serde_json::json!({ "ok": false, "description": "Bad Request" });
        assert!(!is_ok(&rejected));
        assert_eq!(describe_failure(&rejected), "Bad Request");
        assert!(!is_ok(&serde_json::json!({})));
    }
}
