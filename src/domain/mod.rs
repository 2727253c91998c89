pub mod entitlement;
pub mod order;
pub mod redeem;

pub use entitlement::*;
pub use order::*;
pub use redeem::*;
