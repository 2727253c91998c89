//! Outbound gateway client: Native order creation, platform certificate
//! download and settled-transaction lookup for reconciliation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;

use crate::{
    domain::Order,
    error::{AppError, Result},
    service::reconcile_service::{SettledPayment, TransactionSource},
    wechat::{
        crypto, signer::MerchantSigner, CertificateFetcher, CertificateList, NativeOrderAmount,
        NativeOrderRequest, NativeOrderResponse, PaymentEvent,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GatewayClient {
    http: reqwest::Client,
    base: String,
    appid: String,
    notify_url: String,
    api_v3_key: Vec<u8>,
    signer: MerchantSigner,
}

impl GatewayClient {
    pub fn new(
        base: String,
        appid: String,
        notify_url: String,
        api_v3_key: Vec<u8>,
        signer: MerchantSigner,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base,
            appid,
            notify_url,
            api_v3_key,
            signer,
        })
    }

    /// Request a scannable payment code for a pending order, keyed by the
    /// order id as the merchant-side reference.
    pub async fn create_native_order(&self, order: &Order, description: &str) -> Result<String> {
        let path = "/v3/pay/transactions/native";
        let request = NativeOrderRequest {
            mchid: self.signer.mchid().to_string(),
            appid: self.appid.clone(),
            description: description.to_string(),
            out_trade_no: order.order_id.clone(),
            notify_url: self.notify_url.clone(),
            attach: Some(order.user_id.clone()),
            amount: NativeOrderAmount {
                total: order.amount_cents,
                currency: "CNY".to_string(),
            },
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| AppError::Internal(format!("Failed to encode order request: {}", e)))?;
        let authorization = self.signer.build_authorization("POST", path, &body);

        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .header("Authorization", authorization)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::External(format!("Gateway order creation failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::External(format!(
                "Gateway order creation returned {}: {}",
                status, detail
            )));
        }

        let parsed: NativeOrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::External(format!("Malformed gateway response: {}", e)))?;
        Ok(parsed.code_url)
    }

    /// Query the processor's record of a merchant order.
    async fn query_transaction(&self, out_trade_no: &str) -> Result<Option<PaymentEvent>> {
        let path = format!(
            "/v3/pay/transactions/out-trade-no/{}?mchid={}",
            out_trade_no,
            self.signer.mchid()
        );
        let authorization = self.signer.build_authorization("GET", &path, "");

        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .header("Authorization", authorization)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::External(format!("Transaction query failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::External(format!(
                "Transaction query returned {}: {}",
                status, detail
            )));
        }

        let event: PaymentEvent = response
            .json()
            .await
            .map_err(|e| AppError::External(format!("Malformed transaction response: {}", e)))?;
        Ok(Some(event))
    }
}

#[async_trait]
impl CertificateFetcher for GatewayClient {
    async fn fetch_certificates(&self) -> Result<Vec<(String, RsaPublicKey)>> {
        let path = "/v3/certificates";
        let authorization = self.signer.build_authorization("GET", path, "");

        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .header("Authorization", authorization)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::External(format!("Certificate fetch failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::External(format!(
                "Certificate fetch returned {}",
                status
            )));
        }

        let list: CertificateList = response
            .json()
            .await
            .map_err(|e| AppError::External(format!("Malformed certificate list: {}", e)))?;

        let mut certs = Vec::with_capacity(list.data.len());
        for entry in list.data {
            let enc = &entry.encrypt_certificate;
            let aad = enc.associated_data.as_deref().unwrap_or_default();
            let pem = crypto::decrypt(
                &self.api_v3_key,
                enc.nonce.as_bytes(),
                aad.as_bytes(),
                &enc.ciphertext,
            )?;
            let public_key = public_key_from_cert_pem(&pem)?;
            certs.push((entry.serial_no, public_key));
        }
        Ok(certs)
    }
}

#[async_trait]
impl TransactionSource for GatewayClient {
    /// Reconciliation collaborator: ask the processor whether an order it
    /// never notified us about has in fact settled.
    async fn find_settled(&self, order: &Order) -> Result<Option<SettledPayment>> {
        let Some(event) = self.query_transaction(&order.order_id).await? else {
            return Ok(None);
        };
        if !event.is_success() {
            return Ok(None);
        }
        if event.amount.total != order.amount_cents {
            return Err(AppError::Conflict(format!(
                "Settled amount {} does not match order amount {} for {}",
                event.amount.total, order.amount_cents, order.order_id
            )));
        }

        let paid_at = parse_success_time(event.success_time.as_deref())?;
        Ok(Some(SettledPayment {
            transaction_id: event.transaction_id,
            paid_at,
        }))
    }
}

/// Extract the RSA public key from a platform certificate in PEM form.
fn public_key_from_cert_pem(pem: &[u8]) -> Result<RsaPublicKey> {
    let (_, parsed_pem) = x509_parser::pem::parse_x509_pem(pem)
        .map_err(|e| AppError::Signature(format!("Invalid certificate PEM: {}", e)))?;
    let cert = parsed_pem
        .parse_x509()
        .map_err(|e| AppError::Signature(format!("Invalid X.509 certificate: {}", e)))?;
    RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|e| AppError::Signature(format!("Unsupported certificate key: {}", e)))
}

fn parse_success_time(success_time: Option<&str>) -> Result<DateTime<Utc>> {
    match success_time {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AppError::External(format!("Malformed success_time: {}", e))),
        None => Ok(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_time_parses_with_offset() {
        let parsed = parse_success_time(Some("2026-08-24T10:34:56+08:00")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-08-24T02:34:56+00:00");
    }

    #[test]
    fn garbage_success_time_is_an_error() {
        assert!(parse_success_time(Some("yesterday")).is_err());
    }
}
