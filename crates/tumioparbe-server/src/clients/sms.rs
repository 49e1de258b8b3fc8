//! Greenweb SMS gateway client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::SmsConfig;
use crate::db::models::SmsStatus;
use crate::error::{AppError, AppResult};

/// Outcome of one send request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsSendResult {
    pub status: SmsStatus,
    pub successful: usize,
    pub failed: usize,
    /// Per-recipient failure descriptions
    pub failures: Vec<String>,
    /// Provider response, stored on the SMS log
    pub provider_response: serde_json::Value,
}

impl SmsSendResult {
    /// Disabled sends count as delivered.
    pub fn is_success(&self) -> bool {
        matches!(self.status, SmsStatus::Success | SmsStatus::Disabled)
    }

    fn disabled(recipients: usize) -> Self {
        Self {
            status: SmsStatus::Disabled,
            successful: recipients,
            failed: 0,
            failures: Vec::new(),
            provider_response: json!({ "status": "disabled" }),
        }
    }

    fn failed(recipients: &[String], error: String) -> Self {
        Self {
            status: SmsStatus::Failed,
            successful: 0,
            failed: recipients.len(),
            failures: recipients
                .iter()
                .map(|r| format!("{}: {}", r, error))
                .collect(),
            provider_response: json!({ "error": error }),
        }
    }
}

/// HTTP client for the Greenweb API.
#[derive(Clone)]
pub struct SmsClient {
    client: reqwest::Client,
    config: SmsConfig,
}

impl SmsClient {
    pub fn new(config: SmsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.sms_timeout_secs))
            .build()
            .unwrap_or_default();

        Self { client, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.sms_enabled
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.sms_base_url.trim_end_matches('/'), path)
    }

    /// Send one message to every recipient.
    ///
    /// Transport errors are folded into a `FAILED` result so callers can log
    /// the attempt either way.
    pub async fn send(&self, recipients: &[String], message: &str) -> SmsSendResult {
        if !self.config.sms_enabled {
            tracing::info!(recipients = recipients.len(), "SMS disabled, not sending");
            return SmsSendResult::disabled(recipients.len());
        }

        let to = recipients.join(",");
        let mut form = vec![
            ("token", self.config.token().to_string()),
            ("to", to),
            ("message", message.to_string()),
        ];
        if let Some(sender_id) = self.config.sms_sender_id.as_ref().filter(|s| !s.is_empty()) {
            form.push(("senderid", sender_id.clone()));
        }

        let response = match self.client.post(self.url("api.php")).form(&form).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "SMS request failed");
                return SmsSendResult::failed(recipients, e.to_string());
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::error!(%status, body = %body, "SMS provider returned an error");
            return SmsSendResult::failed(recipients, format!("HTTP {}: {}", status, body));
        }

        let result = parse_send_response(&body, recipients.len());
        tracing::info!(
            status = result.status.as_str(),
            successful = result.successful,
            failed = result.failed,
            "SMS send completed"
        );
        result
    }

    /// Remaining account balance.
    pub async fn check_balance(&self) -> AppResult<String> {
        let response = self
            .client
            .get(self.url("g_api.php"))
            .query(&[("token", self.config.token()), ("balance", ""), ("json", "")])
            .send()
            .await?;

        let body = response.error_for_status()?.text().await?;
        let balance = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("balance").map(json_to_string))
            .unwrap_or_else(|| body.trim().to_string());

        Ok(balance)
    }

    /// Provider-side usage statistics.
    pub async fn get_stats(&self) -> AppResult<serde_json::Value> {
        let response = self
            .client
            .get(self.url("g_api.php"))
            .query(&[
                ("token", self.config.token()),
                ("balance", ""),
                ("expiry", ""),
                ("rate", ""),
                ("tokensms", ""),
                ("totalsms", ""),
                ("monthlysms", ""),
                ("json", ""),
            ])
            .send()
            .await?;

        let body = response.error_for_status()?.text().await?;
        serde_json::from_str(&body).map_err(|_| {
            AppError::ExternalService(format!("Unexpected SMS stats response: {}", body.trim()))
        })
    }
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret Greenweb's plain-text reply: one line per recipient, `Ok: ...`
/// on success and `Error: ...` otherwise.
fn parse_send_response(body: &str, recipients: usize) -> SmsSendResult {
    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let successful = lines.iter().filter(|l| l.starts_with("Ok")).count();
    let failures: Vec<String> = lines
        .iter()
        .filter(|l| !l.starts_with("Ok"))
        .map(|l| l.to_string())
        .collect();

    let successful = successful.min(recipients);
    let failed = recipients - successful;

    let status = if failed == 0 && successful > 0 {
        SmsStatus::Success
    } else if successful == 0 {
        SmsStatus::Failed
    } else {
        SmsStatus::Partial
    };

    SmsSendResult {
        status,
        successful,
        failed,
        failures,
        provider_response: json!({ "response": body }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_ok() {
        let body = "Ok: SMS Sent Successfully To 01712345678\nOk: SMS Sent Successfully To 01812345678\n";
        let result = parse_send_response(body, 2);
        assert_eq!(result.status, SmsStatus::Success);
        assert_eq!(result.successful, 2);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_parse_partial() {
        let body = "Ok: SMS Sent Successfully To 01712345678\nError: Invalid Number 0199";
        let result = parse_send_response(body, 2);
        assert_eq!(result.status, SmsStatus::Partial);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures, vec!["Error: Invalid Number 0199"]);
    }

    #[test]
    fn test_parse_failure() {
        let result = parse_send_response("Error: Invalid token", 1);
        assert_eq!(result.status, SmsStatus::Failed);
        assert!(!result.is_success());

        let empty = parse_send_response("", 1);
        assert_eq!(empty.status, SmsStatus::Failed);
    }

    #[tokio::test]
    async fn test_disabled_client_skips_http() {
        let client = SmsClient::new(SmsConfig::default());
        let result = client.send(&["01712345678".to_string()], "hello").await;
        assert_eq!(result.status, SmsStatus::Disabled);
        assert!(result.is_success());
    }
}
