use rand::Rng;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::ClientInfo,
        payment::{CreatePaymentRequest, NewPayment, Payment},
        tenant::TenantContext,
    },
    repository::Repositories,
    services::audit::{self, actions, AuditLog},
};

const MAX_AMOUNT: f64 = 1_000_000_000.0;
const STATUS_SUCCESS: &str = "success";
const STATUS_FAILED: &str = "failed";

/// Stand-in for a payment processor: approves nine charges out of ten.
fn mock_charge() -> &'static str {
    if rand::thread_rng().gen_bool(0.9) {
        STATUS_SUCCESS
    } else {
        STATUS_FAILED
    }
}

fn reference(user_id: uuid::Uuid, method: &str, amount: f64) -> String {
    let user = user_id.simple().to_string();
    let method: String = method.chars().take(2).collect::<String>().to_uppercase();
    format!("MOCK-{}-{}-{}", &user[..8], method, amount)
}

pub struct PaymentService;

impl PaymentService {
    /// Record a mock charge for the calling principal.
    pub async fn create(
        repos: &Repositories,
        ctx: &TenantContext,
        req: &CreatePaymentRequest,
        client: &ClientInfo,
    ) -> AppResult<Payment> {
        let user_id = ctx.actor_id().ok_or(AppError::Unauthorized)?;
        let method = req.method.trim().to_lowercase();
        if method.is_empty() || method.len() > 32 {
            return Err(AppError::Validation("method must be 1 to 32 characters".into()));
        }
        if !req.amount.is_finite() || req.amount <= 0.0 || req.amount > MAX_AMOUNT {
            return Err(AppError::Validation("amount must be a positive number".into()));
        }

        let payment = repos
            .payments
            .insert(
                ctx,
                NewPayment {
                    user_id,
                    reference: reference(user_id, &method, req.amount),
                    method,
                    amount: req.amount,
                    status: mock_charge().to_string(),
                },
            )
            .await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::PAYMENT_CREATE, "payment", payment.id, client),
        )
        .await;
        tracing::info!(payment_id = %payment.id, status = %payment.status, "mock payment recorded");
        Ok(payment)
    }

    /// The caller's payments, newest first.
    pub async fn list_mine(repos: &Repositories, ctx: &TenantContext) -> AppResult<Vec<Payment>> {
        let user_id = ctx.actor_id().ok_or(AppError::Unauthorized)?;
        Ok(repos.payments.list_for_user(ctx, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn reference_format() {
        let user = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        assert_eq!(reference(user, "telebirr", 250.5), "MOCK-a1b2c3d4-TE-250.5");
    }

    #[tokio::test]
    async fn payments_are_validated_and_scoped() {
        let repos = Repositories::in_memory();
        let (tenant, alice) = (Uuid::new_v4(), Uuid::new_v4());
        let ctx = TenantContext::for_principal(tenant, alice);
        let c = ClientInfo::default();

        for amount in [0.0, -5.0, f64::NAN] {
            let req = CreatePaymentRequest { method: "card".into(), amount };
            assert!(matches!(PaymentService::create(&repos, &ctx, &req, &c).await, Err(AppError::Validation(_))));
        }

        let req = CreatePaymentRequest { method: "Card".into(), amount: 99.0 };
        let p = PaymentService::create(&repos, &ctx, &req, &c).await.unwrap();
        assert_eq!(p.method, "card");
        assert!(p.status == STATUS_SUCCESS || p.status == STATUS_FAILED);
        assert!(p.reference.starts_with("MOCK-"));

        assert_eq!(PaymentService::list_mine(&repos, &ctx).await.unwrap().len(), 1);
        let other = TenantContext::for_principal(Uuid::new_v4(), alice);
        assert!(PaymentService::list_mine(&repos, &other).await.unwrap().is_empty());
        let system = TenantContext::system(tenant);
        assert!(matches!(PaymentService::list_mine(&repos, &system).await, Err(AppError::Unauthorized)));
    }
}
