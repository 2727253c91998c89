//! Merchant-side RSA-SHA256 request signing.
//!
//! Every outbound call to the gateway carries an `Authorization` header of
//! the `WECHATPAY2-SHA256-RSA2048` scheme, signing
//! `METHOD \n path+query \n timestamp \n nonce \n body \n` with the
//! merchant's private key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rand::Rng;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;

use crate::error::{AppError, Result};

const AUTH_SCHEME: &str = "WECHATPAY2-SHA256-RSA2048";

pub struct MerchantSigner {
    mchid: String,
    serial_no: String,
    signing_key: SigningKey<Sha256>,
}

impl MerchantSigner {
    pub fn new(mchid: String, serial_no: String, private_key_pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| AppError::Internal(format!("Invalid merchant private key: {}", e)))?;
        Ok(Self {
            mchid,
            serial_no,
            signing_key: SigningKey::<Sha256>::new(key),
        })
    }

    pub fn mchid(&self) -> &str {
        &self.mchid
    }

    /// Sign an arbitrary message and return the base64 signature.
    pub fn sign(&self, message: &[u8]) -> String {
        BASE64.encode(self.signing_key.sign(message).to_vec())
    }

    /// Build the `Authorization` header value for an outbound gateway call.
    pub fn build_authorization(&self, method: &str, path_and_query: &str, body: &str) -> String {
        let timestamp = Utc::now().timestamp();
        let nonce = random_nonce();
        let message = format!(
            "{}\n{}\n{}\n{}\n{}\n",
            method, path_and_query, timestamp, nonce, body
        );
        let signature = self.sign(message.as_bytes());

        format!(
            "{} mchid=\"{}\",nonce_str=\"{}\",signature=\"{}\",timestamp=\"{}\",serial_no=\"{}\"",
            AUTH_SCHEME, self.mchid, nonce, signature, timestamp, self.serial_no
        )
    }
}

fn random_nonce() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes).to_ascii_uppercase()
}
