//! Inbound notification verification and decryption.
//!
//! Fails closed: a missing header, unknown certificate serial, stale
//! timestamp or signature mismatch rejects the whole notification. The
//! platform certificate cache is the only process-local shared mutable
//! state in the service; lookups take a read lock and only the refill
//! holds the write lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::wechat::{crypto, PaymentEvent, WebhookEnvelope};

/// Maximum accepted clock skew between the notification timestamp and
/// server time.
const MAX_TIMESTAMP_SKEW: i64 = 300;

/// How long a fetched certificate set is trusted before a refetch.
const CERT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Signature headers carried on every processor notification.
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub timestamp: String,
    pub nonce: String,
    pub serial: String,
    pub signature: String,
}

impl WebhookHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Result<Self> {
        let get = |name: &str| -> Result<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
                .ok_or_else(|| AppError::Signature(format!("Missing header: {}", name)))
        };
        Ok(Self {
            timestamp: get("wechatpay-timestamp")?,
            nonce: get("wechatpay-nonce")?,
            serial: get("wechatpay-serial")?,
            signature: get("wechatpay-signature")?,
        })
    }
}

/// Source of the processor's published platform certificates, already
/// decrypted and parsed down to their public keys.
#[async_trait]
pub trait CertificateFetcher: Send + Sync {
    async fn fetch_certificates(&self) -> Result<Vec<(String, RsaPublicKey)>>;
}

struct CertCache {
    keys: HashMap<String, RsaPublicKey>,
    refreshed_at: Option<Instant>,
}

pub struct WebhookVerifier {
    fetcher: Arc<dyn CertificateFetcher>,
    api_v3_key: Vec<u8>,
    cache: RwLock<CertCache>,
}

impl WebhookVerifier {
    pub fn new(fetcher: Arc<dyn CertificateFetcher>, api_v3_key: Vec<u8>) -> Self {
        Self {
            fetcher,
            api_v3_key,
            cache: RwLock::new(CertCache {
                keys: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }

    /// Verify the signature over the untouched body and decrypt the wrapped
    /// payment event.
    pub async fn verify_and_decrypt(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<PaymentEvent> {
        let timestamp: i64 = headers
            .timestamp
            .parse()
            .map_err(|_| AppError::Signature("Malformed timestamp header".to_string()))?;
        let skew = (Utc::now().timestamp() - timestamp).abs();
        if skew > MAX_TIMESTAMP_SKEW {
            return Err(AppError::Signature(format!(
                "Timestamp outside replay window ({}s skew)",
                skew
            )));
        }

        let public_key = self.key_for_serial(&headers.serial).await?;

        let mut message = Vec::with_capacity(raw_body.len() + 64);
        message.extend_from_slice(headers.timestamp.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(headers.nonce.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(raw_body);
        message.push(b'\n');

        let signature_bytes = BASE64
            .decode(&headers.signature)
            .map_err(|e| AppError::Signature(format!("Invalid signature encoding: {}", e)))?;
        let signature = Signature::try_from(signature_bytes.as_slice())
            .map_err(|e| AppError::Signature(format!("Invalid signature: {}", e)))?;

        VerifyingKey::<Sha256>::new(public_key)
            .verify(&message, &signature)
            .map_err(|_| AppError::Signature("Signature mismatch".to_string()))?;

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::Signature(format!("Malformed envelope: {}", e)))?;

        self.decrypt_event(&envelope)
    }

    fn decrypt_event(&self, envelope: &WebhookEnvelope) -> Result<PaymentEvent> {
        let resource = &envelope.resource;
        let aad = resource.associated_data.as_deref().unwrap_or_default();
        let plaintext = crypto::decrypt(
            &self.api_v3_key,
            resource.nonce.as_bytes(),
            aad.as_bytes(),
            &resource.ciphertext,
        )?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| AppError::Signature(format!("Malformed payment event: {}", e)))
    }

    /// Cache lookup by serial; a miss or a stale set triggers a refill
    /// under the write lock. A stale read can never produce a wrong
    /// verification, only a refetch.
    async fn key_for_serial(&self, serial: &str) -> Result<RsaPublicKey> {
        {
            let cache = self.cache.read().await;
            let fresh = cache
                .refreshed_at
                .map(|at| at.elapsed() < CERT_CACHE_TTL)
                .unwrap_or(false);
            if fresh {
                if let Some(key) = cache.keys.get(serial) {
                    return Ok(key.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have refilled while we waited on the lock.
        let fresh = cache
            .refreshed_at
            .map(|at| at.elapsed() < CERT_CACHE_TTL)
            .unwrap_or(false);
        if !fresh || !cache.keys.contains_key(serial) {
            let certs = self.fetcher.fetch_certificates().await?;
            cache.keys = certs.into_iter().collect();
            cache.refreshed_at = Some(Instant::now());
            tracing::debug!("Refreshed platform certificate cache ({} serials)", cache.keys.len());
        }

        cache
            .keys
            .get(serial)
            .cloned()
            .ok_or_else(|| AppError::Signature(format!("Unknown certificate serial: {}", serial)))
    }
}
