pub mod audit;
pub mod auth;
pub mod evidence;
pub mod payment;
pub mod tenant;
pub mod user;
pub mod verification;
