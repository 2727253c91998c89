pub mod client;
pub mod crypto;
pub mod signer;
pub mod types;
pub mod verifier;

pub use client::GatewayClient;
pub use signer::MerchantSigner;
pub use types::*;
pub use verifier::{CertificateFetcher, WebhookHeaders, WebhookVerifier};
