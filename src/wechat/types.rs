//! Wire structs for the WeChat Pay v3 API.

use serde::{Deserialize, Serialize};

/// Outer envelope of an inbound payment notification.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    pub create_time: String,
    pub event_type: String,
    #[serde(default)]
    pub summary: String,
    pub resource_type: String,
    pub resource: EncryptedResource,
}

/// AEAD-wrapped payload, used both for notification resources and for
/// platform certificates in the certificate listing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncryptedResource {
    pub algorithm: String,
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default)]
    pub associated_data: Option<String>,
}

/// Decrypted notification resource: the claimed payment event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentEvent {
    pub transaction_id: String,
    pub out_trade_no: String,
    pub trade_state: String,
    #[serde(default)]
    pub trade_state_desc: Option<String>,
    #[serde(default)]
    pub success_time: Option<String>,
    pub amount: PaymentAmount,
}

impl PaymentEvent {
    pub fn is_success(&self) -> bool {
        self.trade_state == "SUCCESS"
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentAmount {
    /// Order amount in minor units (fen).
    pub total: i64,
    #[serde(default)]
    pub payer_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Body for Native order creation (`POST /v3/pay/transactions/native`).
#[derive(Debug, Clone, Serialize)]
pub struct NativeOrderRequest {
    pub mchid: String,
    pub appid: String,
    pub description: String,
    pub out_trade_no: String,
    pub notify_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attach: Option<String>,
    pub amount: NativeOrderAmount,
}

#[derive(Debug, Clone, Serialize)]
pub struct NativeOrderAmount {
    pub total: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NativeOrderResponse {
    pub code_url: String,
    #[serde(default)]
    pub prepay_id: Option<String>,
}

/// `GET /v3/certificates` response.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateList {
    pub data: Vec<CertificateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateEntry {
    pub serial_no: String,
    #[serde(default)]
    pub effective_time: Option<String>,
    #[serde(default)]
    pub expire_time: Option<String>,
    pub encrypt_certificate: EncryptedResource,
}

/// Processor acknowledgement body for webhook responses.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub code: &'static str,
    pub message: &'static str,
}

impl WebhookAck {
    pub fn success() -> Self {
        Self {
            code: "SUCCESS",
            message: "OK",
        }
    }

    pub fn retry() -> Self {
        Self {
            code: "FAIL",
            message: "retry requested",
        }
    }
}
