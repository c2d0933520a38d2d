use super::common::{created_response, map_service_error, success_response, PaginationParams};
use crate::auth::AuthenticatedShopper;
use crate::entities::transaction::TransactionStatus;
use crate::errors::ApiError;
use crate::services::payments::NotificationDisposition;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub status: Option<TransactionStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct CreatePixParams {
    /// Defaults to the shopper's current cart
    pub cart_id: Option<Uuid>,
}

/// Gateway notification body: the event kind plus the charge it refers
/// to, addressed by the gateway's own payment id.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    id: String,
    status: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create-pix", post(create_pix))
        .route("/status/{transaction_id}", get(payment_status))
        .route("/confirm/{transaction_id}", post(confirm_payment))
        .route("/history", get(payment_history))
        .route("/webhook", post(payment_webhook))
}

/// POST /api/v1/payment/create-pix
async fn create_pix(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Query(params): Query<CreatePixParams>,
) -> Result<Response, ApiError> {
    let transaction = state
        .services
        .payments
        .create_pix(shopper_id, params.cart_id)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(transaction))
}

/// GET /api/v1/payment/status/{transaction_id}
async fn payment_status(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Path(transaction_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let transaction = state
        .services
        .payments
        .get_status(shopper_id, transaction_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(transaction))
}

/// POST /api/v1/payment/confirm/{transaction_id}
async fn confirm_payment(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Path(transaction_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let transaction = state
        .services
        .payments
        .confirm(shopper_id, transaction_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(transaction))
}

/// GET /api/v1/payment/history
async fn payment_history(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Query(params): Query<HistoryParams>,
) -> Result<Response, ApiError> {
    let pagination = PaginationParams {
        page: params.page,
        per_page: params.per_page,
    };
    let transactions = state
        .services
        .payments
        .history(
            shopper_id,
            params.status,
            pagination.per_page,
            pagination.offset(),
        )
        .await
        .map_err(map_service_error)?;
    Ok(success_response(transactions))
}

/// POST /api/v1/payment/webhook
///
/// Unauthenticated endpoint for the gateway; when a webhook secret is
/// configured the HMAC signature must check out before the body is even
/// parsed. Unknown ids and redeliveries get a 200 so the gateway stops
/// retrying.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(secret) = state.config.payment_webhook_secret.as_deref() {
        let tolerance = state.config.payment_webhook_tolerance_secs;
        if !verify_signature(&headers, &body, secret, tolerance) {
            warn!("payment webhook signature verification failed");
            return Err(ApiError::Unauthorized);
        }
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    if let Some(kind) = envelope.kind.as_deref() {
        if kind != "payment" {
            warn!(kind, "ignoring webhook of non-payment type");
            return Ok(success_response(json!({ "received": true, "applied": false })));
        }
    }

    let disposition = state
        .services
        .payments
        .handle_gateway_notification(&envelope.data.id, &envelope.data.status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(json!({
        "received": true,
        "applied": disposition == NotificationDisposition::Applied,
    })))
}

/// HMAC-SHA256 over `"{timestamp}.{body}"` with `x-timestamp` and
/// `x-signature` headers, rejecting timestamps outside the tolerance.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, ts: i64, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", ts, body).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_headers(secret: &str, ts: i64, body: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts.to_string()).unwrap());
        headers.insert(
            "x-signature",
            HeaderValue::from_str(&sign(secret, ts, body)).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let body = r#"{"type":"payment"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = signed_headers("s3cret", ts, body);
        assert!(verify_signature(
            &headers,
            &Bytes::from(body),
            "s3cret",
            300
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = r#"{"type":"payment"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = signed_headers("other", ts, body);
        assert!(!verify_signature(
            &headers,
            &Bytes::from(body),
            "s3cret",
            300
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let body = "{}";
        let ts = chrono::Utc::now().timestamp() - 3600;
        let headers = signed_headers("s3cret", ts, body);
        assert!(!verify_signature(
            &headers,
            &Bytes::from(body),
            "s3cret",
            300
        ));
    }

    #[test]
    fn rejects_missing_headers() {
        assert!(!verify_signature(
            &HeaderMap::new(),
            &Bytes::from_static(b"{}"),
            "s3cret",
            300
        ));
    }
}
