use crate::errors::ServiceError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

/// A freshly issued PIX charge as returned by the gateway.
#[derive(Debug, Clone)]
pub struct PixCharge {
    /// Gateway-side identifier, `MP` followed by 12 uppercase hex chars
    pub payment_id: String,
    /// EMV copy-and-paste payload
    pub pix_code: String,
    /// QR image as a base64 data URL
    pub qr_code: String,
    pub expires_at: DateTime<Utc>,
}

/// The slice of a stored transaction a gateway needs to answer a poll.
#[derive(Debug, Clone)]
pub struct ChargeState {
    pub payment_id: String,
    pub created_at: DateTime<Utc>,
    pub pix_expiration: DateTime<Utc>,
}

/// What the gateway reports when asked about a pending charge.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    StillPending,
    Approved { evidence: serde_json::Value },
    Expired,
}

/// Seam between the checkout pipeline and the payment provider.
///
/// The pipeline only ever creates charges and polls them; confirmation
/// by webhook bypasses the gateway entirely.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(
        &self,
        amount: Decimal,
        reference: Uuid,
    ) -> Result<PixCharge, ServiceError>;

    async fn poll(
        &self,
        charge: &ChargeState,
        now: DateTime<Utc>,
    ) -> Result<PollOutcome, ServiceError>;
}

/// Simulated PIX provider.
///
/// Issues well-formed charges locally and approves them stochastically
/// once `approval_after` has elapsed since creation. The window and
/// probability are configurable so tests can force either outcome.
#[derive(Debug, Clone)]
pub struct SimulatedPixGateway {
    expiration: Duration,
    approval_after: Duration,
    approval_probability: f64,
}

impl SimulatedPixGateway {
    pub fn new(
        expiration_minutes: i64,
        approval_after_secs: i64,
        approval_probability: f64,
    ) -> Self {
        Self {
            expiration: Duration::minutes(expiration_minutes),
            approval_after: Duration::seconds(approval_after_secs),
            approval_probability,
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPixGateway {
    async fn create_charge(
        &self,
        amount: Decimal,
        reference: Uuid,
    ) -> Result<PixCharge, ServiceError> {
        let now = Utc::now();
        let payment_id = format!(
            "MP{}",
            &Uuid::new_v4().simple().to_string().to_uppercase()[..12]
        );
        let pix_code = build_pix_payload(&payment_id, reference);
        // The simulated provider has no renderer; the payload itself
        // stands in for the QR image bytes.
        let qr_code = format!("data:image/png;base64,{}", BASE64.encode(&pix_code));

        debug!(%payment_id, %amount, "issued simulated pix charge");

        Ok(PixCharge {
            payment_id,
            pix_code,
            qr_code,
            expires_at: now + self.expiration,
        })
    }

    async fn poll(
        &self,
        charge: &ChargeState,
        now: DateTime<Utc>,
    ) -> Result<PollOutcome, ServiceError> {
        if now > charge.pix_expiration {
            return Ok(PollOutcome::Expired);
        }

        if now - charge.created_at >= self.approval_after
            && rand::thread_rng().gen_bool(self.approval_probability)
        {
            return Ok(PollOutcome::Approved {
                evidence: json!({
                    "source": "simulated_gateway",
                    "payment_id": charge.payment_id,
                    "approved_at": now.to_rfc3339(),
                }),
            });
        }

        Ok(PollOutcome::StillPending)
    }
}

/// Assembles an EMV-style "copia e cola" payload around the payment id
/// and a shortened transaction reference.
fn build_pix_payload(payment_id: &str, reference: Uuid) -> String {
    let txid = &reference.simple().to_string().to_uppercase()[..10];
    format!(
        "00020126{:02}{}5204000053039865802BR5925GUARDFLOW PAGAMENTOS LTDA6009SAO PAULO62{:02}{}6304",
        payment_id.len(),
        payment_id,
        txid.len(),
        txid,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn charge_state(created_secs_ago: i64, expires_in_secs: i64) -> ChargeState {
        let now = Utc::now();
        ChargeState {
            payment_id: "MPABCDEF123456".to_string(),
            created_at: now - Duration::seconds(created_secs_ago),
            pix_expiration: now + Duration::seconds(expires_in_secs),
        }
    }

    #[tokio::test]
    async fn charge_has_expected_shape() {
        let gateway = SimulatedPixGateway::new(30, 120, 0.8);
        let charge = gateway
            .create_charge(dec!(100.00), Uuid::new_v4())
            .await
            .unwrap();

        assert!(charge.payment_id.starts_with("MP"));
        assert_eq!(charge.payment_id.len(), 14);
        assert!(charge.pix_code.starts_with("000201"));
        assert!(charge.pix_code.ends_with("6304"));
        assert!(charge.qr_code.starts_with("data:image/png;base64,"));
        assert!(charge.expires_at > Utc::now() + Duration::minutes(29));
    }

    #[tokio::test]
    async fn poll_before_window_stays_pending() {
        let gateway = SimulatedPixGateway::new(30, 120, 1.0);
        let outcome = gateway
            .poll(&charge_state(10, 1800), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::StillPending));
    }

    #[tokio::test]
    async fn poll_after_window_approves_with_certain_probability() {
        let gateway = SimulatedPixGateway::new(30, 120, 1.0);
        let outcome = gateway
            .poll(&charge_state(150, 1800), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::Approved { .. }));
    }

    #[tokio::test]
    async fn poll_after_window_with_zero_probability_stays_pending() {
        let gateway = SimulatedPixGateway::new(30, 120, 0.0);
        let outcome = gateway
            .poll(&charge_state(150, 1800), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::StillPending));
    }

    #[tokio::test]
    async fn poll_past_deadline_reports_expired() {
        let gateway = SimulatedPixGateway::new(30, 120, 1.0);
        let outcome = gateway
            .poll(&charge_state(3600, -10), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::Expired));
    }
}
