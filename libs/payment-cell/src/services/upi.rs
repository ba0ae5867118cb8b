// libs/payment-cell/src/services/upi.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::UpiGatewayError;
use crate::models::{FailureCode, MinorUnits, PaymentReceipt, UpiQr};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpiQrRequest {
    pub intent_id: Uuid,
    pub attempt_id: Uuid,
    pub amount: MinorUnits,
    pub validity_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpiPollStatus {
    Pending,
    /// Payer opened the collect request but has not approved it yet.
    Scanned { payer_handle: Option<String> },
    Success(PaymentReceipt),
    Failed { code: FailureCode, message: String },
}

/// Collect-request gateway used by UPI attempts.
#[async_trait]
pub trait UpiGateway: Send + Sync {
    async fn create_qr(&self, request: &UpiQrRequest) -> Result<UpiQr, UpiGatewayError>;

    async fn poll_status(&self, reference: &str) -> Result<UpiPollStatus, UpiGatewayError>;
}

#[derive(Debug, Deserialize)]
struct QrResponse {
    reference: String,
    qr_payload: String,
    deep_link: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum GatewayStatus {
    Pending,
    Scanned,
    Success,
    Failed,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: GatewayStatus,
    payer_handle: Option<String>,
    utr: Option<String>,
    rrn: Option<String>,
    failure_code: Option<String>,
    failure_message: Option<String>,
}

impl From<StatusResponse> for UpiPollStatus {
    fn from(body: StatusResponse) -> Self {
        match body.status {
            GatewayStatus::Pending => UpiPollStatus::Pending,
            GatewayStatus::Scanned => UpiPollStatus::Scanned { payer_handle: body.payer_handle },
            GatewayStatus::Success => UpiPollStatus::Success(PaymentReceipt::Upi {
                payer_handle: body.payer_handle,
                utr: body.utr,
                rrn: body.rrn,
            }),
            GatewayStatus::Failed => UpiPollStatus::Failed {
                code: body
                    .failure_code
                    .map(FailureCode::from)
                    .unwrap_or(FailureCode::GatewayError),
                message: body.failure_message.unwrap_or_default(),
            },
        }
    }
}

/// REST client for the UPI collect gateway.
pub struct HttpUpiGateway {
    client: Client,
    base_url: String,
}

impl HttpUpiGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.upi_gateway_url.trim_end_matches('/').to_string(),
        }
    }

    async fn read_body(response: reqwest::Response) -> Result<String, UpiGatewayError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("UPI gateway returned {}: {}", status, text);
            return Err(UpiGatewayError::Api { status: status.as_u16(), message: text });
        }
        Ok(text)
    }
}

#[async_trait]
impl UpiGateway for HttpUpiGateway {
    async fn create_qr(&self, request: &UpiQrRequest) -> Result<UpiQr, UpiGatewayError> {
        let url = format!("{}/qr", self.base_url);
        debug!("Requesting UPI QR for intent {} at {}", request.intent_id, url);

        let response = self.client.post(&url).json(request).send().await?;
        let text = Self::read_body(response).await?;

        let body: QrResponse = serde_json::from_str(&text)
            .map_err(|e| UpiGatewayError::Decode(format!("QR response: {}", e)))?;

        info!("UPI QR {} issued for intent {}", body.reference, request.intent_id);
        Ok(UpiQr {
            reference: body.reference,
            qr_payload: body.qr_payload,
            deep_link: body.deep_link,
            expires_at: body.expires_at,
        })
    }

    async fn poll_status(&self, reference: &str) -> Result<UpiPollStatus, UpiGatewayError> {
        let url = format!("{}/status/{}", self.base_url, reference);
        let response = self.client.get(&url).send().await?;
        let text = Self::read_body(response).await?;

        let body: StatusResponse = serde_json::from_str(&text)
            .map_err(|e| UpiGatewayError::Decode(format!("status response: {}", e)))?;

        Ok(body.into())
    }
}
