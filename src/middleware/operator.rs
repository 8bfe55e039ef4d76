use axum::{extract::FromRequestParts, http::request::Parts};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{error::AppError, state::AppState};

type HmacSha256 = Hmac<Sha256>;

pub const OPERATOR_KEY_HEADER: &str = "X-Operator-Key";

/// Extractor that validates the `X-Operator-Key` header against
/// `config.operator_key`. Without a configured key every request is refused.
pub struct OperatorAuth;

impl FromRequestParts<AppState> for OperatorAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.config.operator_key.as_deref().ok_or(AppError::Unauthorized)?;
        let presented = parts
            .headers
            .get(OPERATOR_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        if !keys_match(expected, presented) {
            tracing::warn!("rejected operator request with an invalid key");
            return Err(AppError::Unauthorized);
        }
        Ok(OperatorAuth)
    }
}

/// Compares fixed-length tags so the check does not leak the key length or prefix.
fn keys_match(expected: &str, presented: &str) -> bool {
    let tag = |input: &str| {
        HmacSha256::new_from_slice(expected.as_bytes()).map(|mut mac| {
            mac.update(input.as_bytes());
            mac
        })
    };
    match (tag(expected), tag(presented)) {
        (Ok(want), Ok(got)) => got.verify_slice(&want.finalize().into_bytes()).is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_exact_key_matches() {
        assert!(keys_match("operator-secret", "operator-secret"));
        assert!(!keys_match("operator-secret", "operator-secre"));
        assert!(!keys_match("operator-secret", "operator-secret "));
        assert!(!keys_match("operator-secret", ""));
    }
}
