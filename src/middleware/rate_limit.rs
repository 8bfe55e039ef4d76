use crate::error::{AppError, AppResult};

pub const LOGIN_MAX_ATTEMPTS: u64 = 5;
pub const LOGIN_WINDOW_SECS: u64 = 900;

/// Keyed on the email alone, so varying the tenant hint shares one budget.
pub fn login_key(email: &str) -> String {
    format!("rate:login:{}", email.trim().to_lowercase())
}

/// Checks a rate limit stored in Redis.
///
/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for `key`
/// - On first increment, sets TTL to `window_secs`
/// - Returns `RateLimited` if counter exceeds `max_attempts`
///
/// A Redis failure lets the request through.
pub async fn check_rate_limit(
    redis: &mut redis::aio::MultiplexedConnection,
    key: &str,
    max_attempts: u64,
    window_secs: u64,
) -> AppResult<()> {
    let count: u64 = match redis::cmd("INCR").arg(key).query_async(redis).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("rate limit check skipped: {e}");
            return Ok(());
        }
    };

    if count == 1 {
        // Set TTL only on first increment to avoid resetting the window on each attempt
        let _: Result<(), _> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(redis)
            .await;
    }

    if count > max_attempts {
        return Err(AppError::RateLimited);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_keys_are_normalized() {
        assert_eq!(login_key(" Alice@Acme.test"), "rate:login:alice@acme.test");
        assert_eq!(login_key("alice@acme.test"), login_key("ALICE@ACME.TEST "));
    }
}
