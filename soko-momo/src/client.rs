use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use soko_core::payment::{
    CollectionGateway, CollectionRequest, Environment, GatewayDecision, GatewayError, PollStatus,
};

use crate::msisdn;

const SANDBOX_BASE: &str = "https://sandbox.momodeveloper.mtn.com";
const PRODUCTION_BASE: &str = "https://proxy.momoapi.mtn.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Collections API credentials and target environment.
#[derive(Debug, Clone, Deserialize)]
pub struct MomoConfig {
    pub subscription_key: String,
    pub api_user: String,
    pub api_key: String,
    pub environment: Environment,
}

impl MomoConfig {
    fn base_url(&self) -> &'static str {
        match self.environment {
            Environment::Sandbox => SANDBOX_BASE,
            Environment::Production => PRODUCTION_BASE,
        }
    }

    fn target_environment(&self) -> &'static str {
        match self.environment {
            Environment::Sandbox => "sandbox",
            Environment::Production => "mtnrwanda",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: PollStatus,
}

/// HTTP client for the Collections API. The bearer token is cached across
/// calls and refreshed once on a 401 before the call is surfaced as an
/// auth failure.
pub struct MomoClient {
    http: reqwest::Client,
    config: MomoConfig,
    token: Mutex<Option<String>>,
}

impl MomoClient {
    pub fn new(config: MomoConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    async fn fetch_token(&self) -> Result<String, GatewayError> {
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.config.api_user, self.config.api_key));
        let response = self
            .http
            .post(format!("{}/collection/token/", self.config.base_url()))
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("Authorization", format!("Basic {basic}"))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("malformed token response: {e}")))?;
        tracing::debug!("collections bearer token refreshed");
        Ok(token.access_token)
    }

    /// Cached bearer token; `force` discards the cache first.
    async fn bearer(&self, force: bool) -> Result<String, GatewayError> {
        let mut token = self.token.lock().await;
        if force || token.is_none() {
            *token = Some(self.fetch_token().await?);
        }
        Ok(token.clone().unwrap_or_default())
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() || err.is_connect() {
        GatewayError::Unavailable(err.to_string())
    } else {
        GatewayError::Protocol(err.to_string())
    }
}

/// Map a non-success request-to-pay status to either a shopper-facing
/// rejection or a retryable gateway error.
fn classify_rejection(status: StatusCode) -> Result<(String, String), GatewayError> {
    let pair = match status.as_u16() {
        400 => (
            "BAD_REQUEST",
            "The payment request was invalid. Check the mobile money number and try again.",
        ),
        403 => (
            "FORBIDDEN",
            "The payment request was not allowed. Please try again later.",
        ),
        404 => (
            "NOT_FOUND",
            "The payment service could not process this request.",
        ),
        409 => (
            "DUPLICATE",
            "This payment was already submitted. Check its status before retrying.",
        ),
        code if code >= 500 => {
            return Err(GatewayError::Unavailable(format!(
                "provider returned {status}"
            )))
        }
        _ => (
            "UNEXPECTED",
            "The payment could not be started. Please try again.",
        ),
    };
    Ok((pair.0.to_string(), pair.1.to_string()))
}

#[async_trait]
impl CollectionGateway for MomoClient {
    async fn request_to_pay(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayDecision, GatewayError> {
        let payer = msisdn::normalize(self.config.environment, &request.payer_msisdn);
        let body = json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "externalId": request.external_ref.to_string(),
            "payer": {
                "partyIdType": "MSISDN",
                "partyId": payer,
            },
            "payerMessage": request.payer_message,
            "payeeNote": "Marketplace order",
        });

        let mut token = self.bearer(false).await?;
        let mut refreshed = false;
        loop {
            let response = self
                .http
                .post(format!(
                    "{}/collection/v1_0/requesttopay",
                    self.config.base_url()
                ))
                .header("X-Reference-Id", request.external_ref.to_string())
                .header("X-Target-Environment", self.config.target_environment())
                .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
                .header("Authorization", format!("Bearer {token}"))
                .json(&body)
                .send()
                .await
                .map_err(transport)?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(GatewayError::Auth("request-to-pay returned 401".into()));
                }
                refreshed = true;
                token = self.bearer(true).await?;
                continue;
            }
            // 200/202: the provider accepted the request for async approval.
            if status.is_success() {
                tracing::info!(external_ref = %request.external_ref, "request-to-pay accepted");
                return Ok(GatewayDecision::Accepted {
                    gateway_ref: request.external_ref,
                });
            }

            tracing::warn!(
                external_ref = %request.external_ref,
                status = %status,
                "request-to-pay declined"
            );
            let (code, user_message) = classify_rejection(status)?;
            return Ok(GatewayDecision::Rejected { code, user_message });
        }
    }

    async fn poll_status(&self, external_ref: Uuid) -> Result<PollStatus, GatewayError> {
        let mut token = self.bearer(false).await?;
        let mut refreshed = false;
        loop {
            let response = self
                .http
                .get(format!(
                    "{}/collection/v1_0/requesttopay/{external_ref}",
                    self.config.base_url()
                ))
                .header("X-Target-Environment", self.config.target_environment())
                .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await
                .map_err(transport)?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(GatewayError::Auth("status lookup returned 401".into()));
                }
                refreshed = true;
                token = self.bearer(true).await?;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Err(GatewayError::Protocol(format!(
                    "no collection found for {external_ref}"
                )));
            }
            if !status.is_success() {
                return Err(GatewayError::Unavailable(format!(
                    "status lookup returned {status}"
                )));
            }

            let parsed: StatusResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::Protocol(format!("malformed status response: {e}")))?;
            return Ok(parsed.status);
        }
    }

    fn environment(&self) -> Environment {
        self.config.environment
    }
}
