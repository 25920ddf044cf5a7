//! Campaign-API adapter (HTTP).
//!
//! Implements the `otpcast-core` SourceApi port: login and bulk fetch. The
//! fetch timeout is deliberately long (the API aggregates slowly), the login
//! timeout short.

use std::time::Duration;

use async_trait::async_trait;

use otpcast_core::{
    domain::RawMessage,
    errors::Error,
    ports::SourceApi,
    Result,
};

#[derive(Clone, Debug)]
pub struct CampaignApi {
    api_base: String,
    login_timeout: Duration,
    fetch_timeout: Duration,
    http: reqwest::Client,
}

impl CampaignApi {
    pub fn new(api_base: impl Into<String>, login_timeout: Duration, fetch_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client build");
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            login_timeout,
            fetch_timeout,
            http,
        }
    }
}

#[async_trait]
impl SourceApi for CampaignApi {
    async fn login(&self, email: &str, password: &str) -> Result<String> {
        let url = format!("{}/api/v1/auth/login", self.api_base);
        let resp = self
            .http
            .post(&url)
            .timeout(self.login_timeout)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| Error::Auth {
                account: email.to_string(),
                reason: format!("login request error: {e}"),
            })?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| Error::Auth {
            account: email.to_string(),
            reason: format!("login response error: {e}"),
        })?;

        if !status.is_success() {
            return Err(Error::Auth {
                account: email.to_string(),
                reason: format!("login rejected: {status}"),
            });
        }

        token_from_body(&body).ok_or_else(|| Error::Auth {
            account: email.to_string(),
            reason: "login response has no token".to_string(),
        })
    }

    async fn fetch_messages(&self, token: &str, start_date: &str) -> Result<Vec<RawMessage>> {
        let url = format!("{}/api/v1/biring/code", self.api_base);
        let resp = self
            .http
            .post(&url)
            .timeout(self.fetch_timeout)
            .json(&serde_json::json!({ "token": token, "start_date": start_date }))
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("fetch request error: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("fetch response error: {e}")))?;

        if !status.is_success() {
            return Err(Error::Fetch(format!("fetch rejected ({status}): {body}")));
        }

        Ok(messages_from_body(&body))
    }
}

fn token_from_body(body: &serde_json::Value) -> Option<String> {
    body.get("data")
        .and_then(|d| d.get("token"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .filter(|t| !t.is_empty())
}

fn messages_from_body(body: &serde_json::Value) -> Vec<RawMessage> {
    let Some(rows) = body
        .get("data")
        .and_then(|d| d.get("messages"))
        .and_then(|m| m.as_array())
    else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| serde_json::from_value(row.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_extracted_from_data_envelope() {
        let body = serde_json::json!({ "data": { "token": "abc" } });
        assert_eq!(token_from_body(&body), Some("abc".to_string()));

        assert_eq!(token_from_body(&serde_json::json!({ "data": {} })), None);
        assert_eq!(
            token_from_body(&serde_json::json!({ "data": { "token": "" } })),
            None
        );
        assert_eq!(token_from_body(&serde_json::json!({})), None);
    }

    #[test]
    fn messages_parsed_and_bad_rows_skipped() {
        let body = serde_json::json!({
            "data": {
                "messages": [
                    { "number": "12425551234", "service_name": "Acme", "message": "code 4321", "range": "1242" },
                    "not an object",
                    { "number": 15551234, "service_name": "Beta", "message": "m", "revenue": 0.02 }
                ]
            }
        });
        let rows = messages_from_body(&body);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, "12425551234");
        assert_eq!(rows[1].number, "15551234");

        assert!(messages_from_body(&serde_json::json!({ "data": {} })).is_empty());
        assert!(messages_from_body(&serde_json::json!(null)).is_empty());
    }
}
