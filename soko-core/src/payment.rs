use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway target environment. Sandbox uses the provider's shared test
/// MSISDN and EUR amounts; production uses E.164 local numbers and RWF.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn currency(&self) -> &'static str {
        match self {
            Environment::Sandbox => "EUR",
            Environment::Production => "RWF",
        }
    }
}

/// Outbound request-to-pay. `amount` is in the currency's smallest unit and
/// serialized as a string on the wire; `external_ref` is the client-generated
/// idempotency key that survives the whole payment round-trip.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRequest {
    pub amount: i64,
    pub currency: String,
    pub external_ref: Uuid,
    pub payer_msisdn: String,
    pub payer_message: String,
}

/// Gateway answer to a request-to-pay. `Rejected` is a provider decision
/// carrying the mapped `{code, user message}` pair; transport failures are
/// `GatewayError::Unavailable` instead and must stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayDecision {
    Accepted { gateway_ref: Uuid },
    Rejected { code: String, user_message: String },
}

/// Collection status as reported by the provider's status lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    Pending,
    Successful,
    Failed,
    Rejected,
    Expired,
}

impl PollStatus {
    /// Terminal statuses end the polling loop; only `Successful` may ever
    /// create an order.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollStatus::Pending)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Timeout or connection failure. Retryable; no provider decision was
    /// made.
    #[error("gateway unreachable: {0}")]
    Unavailable(String),

    #[error("gateway authentication failed: {0}")]
    Auth(String),

    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

/// Adapter to an external mobile-money collections API.
#[async_trait]
pub trait CollectionGateway: Send + Sync {
    /// Initiate a request-to-pay. Success means the provider accepted the
    /// request for asynchronous approval, not that money moved.
    async fn request_to_pay(
        &self,
        request: &CollectionRequest,
    ) -> Result<GatewayDecision, GatewayError>;

    /// Look up the collection referenced by `external_ref`.
    async fn poll_status(&self, external_ref: Uuid) -> Result<PollStatus, GatewayError>;

    fn environment(&self) -> Environment;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_status_wire_format_is_screaming_snake() {
        let status: PollStatus = serde_json::from_str("\"SUCCESSFUL\"").unwrap();
        assert_eq!(status, PollStatus::Successful);
        assert_eq!(serde_json::to_string(&PollStatus::Expired).unwrap(), "\"EXPIRED\"");
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!PollStatus::Pending.is_terminal());
        for s in [
            PollStatus::Successful,
            PollStatus::Failed,
            PollStatus::Rejected,
            PollStatus::Expired,
        ] {
            assert!(s.is_terminal());
        }
    }
}
