pub mod entitlements;
pub mod orders;
pub mod reconcile;
pub mod redeem;
pub mod root;
pub mod webhook;
