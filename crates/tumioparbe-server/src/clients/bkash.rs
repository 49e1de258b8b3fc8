//! bKash tokenized checkout client.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::BkashConfig;
use crate::error::{AppError, AppResult};

/// bKash status code for a successful call.
pub const BKASH_SUCCESS: &str = "0000";

/// Tokens are renewed this long before they expire.
const TOKEN_REFRESH_MARGIN: chrono::Duration = chrono::Duration::minutes(5);

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Response body shared by create, execute and query calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BkashResponse {
    #[serde(rename = "statusCode", default)]
    pub status_code: Option<String>,

    #[serde(rename = "statusMessage", default)]
    pub status_message: Option<String>,

    #[serde(rename = "paymentID", default)]
    pub payment_id: Option<String>,

    #[serde(rename = "bkashURL", default)]
    pub bkash_url: Option<String>,

    #[serde(rename = "transactionStatus", default)]
    pub transaction_status: Option<String>,

    #[serde(rename = "trxID", default)]
    pub trx_id: Option<String>,

    #[serde(default)]
    pub amount: Option<String>,

    #[serde(rename = "payerReference", default)]
    pub payer_reference: Option<String>,

    #[serde(rename = "merchantInvoiceNumber", default)]
    pub merchant_invoice_number: Option<String>,

    #[serde(rename = "successCallbackURL", default)]
    pub success_callback_url: Option<String>,

    #[serde(rename = "failureCallbackURL", default)]
    pub failure_callback_url: Option<String>,

    #[serde(rename = "cancelledCallbackURL", default)]
    pub cancelled_callback_url: Option<String>,
}

impl BkashResponse {
    pub fn is_success(&self) -> bool {
        self.status_code.as_deref() == Some(BKASH_SUCCESS)
    }

    /// Successful call whose transaction completed.
    pub fn is_completed(&self) -> bool {
        self.is_success() && self.transaction_status.as_deref() == Some("Completed")
    }

    pub fn status_code(&self) -> &str {
        self.status_code.as_deref().unwrap_or("")
    }

    pub fn status_message(&self) -> &str {
        self.status_message.as_deref().unwrap_or("Unknown error")
    }

    /// The gateway's callback URLs, as returned to the frontend.
    pub fn callback_urls(&self) -> serde_json::Value {
        json!({
            "success": self.success_callback_url,
            "failure": self.failure_callback_url,
            "cancelled": self.cancelled_callback_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    id_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + TOKEN_REFRESH_MARGIN
    }
}

/// HTTP client for the bKash tokenized checkout API.
#[derive(Clone)]
pub struct BkashClient {
    client: reqwest::Client,
    base_url: String,
    config: Arc<BkashConfig>,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl BkashClient {
    pub fn new(config: BkashConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.api_base(),
            config: Arc::new(config),
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Whether merchant credentials are present.
    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub fn app_secret(&self) -> &str {
        &self.config.app_secret
    }

    /// Current id token, granting or refreshing one when needed.
    async fn id_token(&self) -> AppResult<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.id_token.clone());
            }
        }

        let mut guard = self.token.write().await;
        if let Some(token) = guard.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.id_token.clone());
            }
        }

        let refreshed = match guard.as_ref().and_then(|t| t.refresh_token.clone()) {
            Some(refresh_token) => match self.refresh(&refresh_token).await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(error = %e, "bKash token refresh failed, requesting a new grant");
                    self.grant().await?
                }
            },
            None => self.grant().await?,
        };

        let id_token = refreshed.id_token.clone();
        *guard = Some(refreshed);
        Ok(id_token)
    }

    async fn grant(&self) -> AppResult<CachedToken> {
        let body = json!({
            "app_key": self.config.app_key,
            "app_secret": self.config.app_secret,
        });
        let token = self.token_request("tokenized/checkout/token/grant", body).await?;
        tracing::info!("Obtained bKash token");
        Ok(token)
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<CachedToken> {
        let body = json!({
            "app_key": self.config.app_key,
            "app_secret": self.config.app_secret,
            "refresh_token": refresh_token,
        });
        let token = self.token_request("tokenized/checkout/token/refresh", body).await?;
        tracing::info!("Refreshed bKash token");
        Ok(token)
    }

    async fn token_request(&self, path: &str, body: serde_json::Value) -> AppResult<CachedToken> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Accept", "application/json")
            .header("username", &self.config.username)
            .header("password", &self.config.password)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "bKash token request failed ({}): {}",
                status, text
            )));
        }

        let grant: GrantResponse = response.json().await?;
        let id_token = grant.id_token.ok_or_else(|| {
            AppError::ExternalService(format!(
                "bKash token request returned no token: {}",
                grant.status_message.unwrap_or_default()
            ))
        })?;

        Ok(CachedToken {
            id_token,
            refresh_token: grant.refresh_token,
            expires_at: Utc::now()
                + chrono::Duration::seconds(grant.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)),
        })
    }

    async fn checkout_call(&self, path: &str, body: serde_json::Value) -> AppResult<BkashResponse> {
        let token = self.id_token().await?;

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Accept", "application/json")
            .header("Authorization", token)
            .header("X-App-Key", &self.config.app_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "bKash {} failed ({}): {}",
                path, status, text
            )));
        }

        let parsed: BkashResponse = response.json().await?;
        if !parsed.is_success() {
            tracing::error!(
                path,
                status_code = parsed.status_code(),
                status_message = parsed.status_message(),
                "bKash call returned an error status"
            );
        }
        Ok(parsed)
    }

    /// Create a checkout-URL payment.
    pub async fn create_payment(
        &self,
        amount: Decimal,
        merchant_invoice: &str,
        payer_reference: &str,
        callback_url: &str,
    ) -> AppResult<BkashResponse> {
        let body = json!({
            "mode": "0011",
            "payerReference": payer_reference,
            "callbackURL": callback_url,
            "amount": format_amount(amount),
            "currency": "BDT",
            "intent": "sale",
            "merchantInvoiceNumber": merchant_invoice,
        });

        let response = self.checkout_call("tokenized/checkout/create", body).await?;
        if response.is_success() {
            tracing::info!(merchant_invoice, payment_id = ?response.payment_id, "Created bKash payment");
        }
        Ok(response)
    }

    /// Execute a payment after the customer authorized it.
    pub async fn execute_payment(&self, payment_id: &str) -> AppResult<BkashResponse> {
        let response = self
            .checkout_call("tokenized/checkout/execute", json!({ "paymentID": payment_id }))
            .await?;
        if response.is_success() {
            tracing::info!(payment_id, trx_id = ?response.trx_id, "Executed bKash payment");
        }
        Ok(response)
    }

    pub async fn query_payment(&self, payment_id: &str) -> AppResult<BkashResponse> {
        self.checkout_call(
            "tokenized/checkout/payment/status",
            json!({ "paymentID": payment_id }),
        )
        .await
    }
}

/// Amount as bKash expects it: a decimal string with two places.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "statusCode": "0000",
            "statusMessage": "Successful",
            "paymentID": "TR0011abc",
            "trxID": "9ABC123",
            "transactionStatus": "Completed",
            "amount": "1500.00"
        }"#;
        let response: BkashResponse = serde_json::from_str(body).unwrap();
        assert!(response.is_success());
        assert!(response.is_completed());
        assert_eq!(response.payment_id.as_deref(), Some("TR0011abc"));
        assert_eq!(response.trx_id.as_deref(), Some("9ABC123"));
    }

    #[test]
    fn test_error_response() {
        let response: BkashResponse =
            serde_json::from_str(r#"{"statusCode": "2023", "statusMessage": "Insufficient Balance"}"#)
                .unwrap();
        assert!(!response.is_success());
        assert!(!response.is_completed());
        assert_eq!(response.status_message(), "Insufficient Balance");

        let empty = BkashResponse::default();
        assert_eq!(empty.status_code(), "");
        assert_eq!(empty.status_message(), "Unknown error");
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let token = CachedToken {
            id_token: "t".to_string(),
            refresh_token: None,
            expires_at: now + chrono::Duration::minutes(4),
        };
        assert!(!token.is_fresh(now));

        let token = CachedToken {
            expires_at: now + chrono::Duration::minutes(30),
            ..token
        };
        assert!(token.is_fresh(now));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(dec!(1500)), "1500.00");
        assert_eq!(format_amount(dec!(99.999)), "100.00");
        assert_eq!(format_amount(dec!(12.5)), "12.50");
    }
}
