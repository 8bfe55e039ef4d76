pub mod auth;
pub mod client;
pub mod operator;
pub mod rate_limit;
pub mod tenant;
