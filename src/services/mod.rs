pub mod audit;
pub mod auth;
pub mod encryption;
pub mod evidence;
pub mod payments;
pub mod storage;
pub mod tenants;
pub mod verifications;
