use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{
        auth::{AuthenticatedUser, Claims, ClientInfo, Session},
        tenant::TenantContext,
        user::{NewUser, ProfileFields, ProfileUpdate, User, UserRole, UserStatus},
    },
    repository::Repositories,
    services::{
        audit::{self, actions, AuditLog},
        tenants::TenantRegistry,
    },
};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 72; // bcrypt ignores anything past 72 bytes

pub fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AppError::Validation("invalid email address".into()));
    }
    Ok(email)
}

fn check_password(password: &str) -> AppResult<()> {
    if password.len() < MIN_PASSWORD_LEN || password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be {MIN_PASSWORD_LEN} to {MAX_PASSWORD_LEN} bytes"
        )));
    }
    Ok(())
}

fn check_full_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() || name.len() > 200 {
        return Err(AppError::Validation("full_name must be 1 to 200 characters".into()));
    }
    Ok(())
}

/// The single issuer and verifier of credentials and session tokens.
pub struct AuthService;

impl AuthService {
    /// Register a principal in an existing, active tenant.
    pub async fn register(
        repos: &Repositories,
        config: &Config,
        tenant_id: Uuid,
        email: &str,
        password: &str,
        profile: ProfileFields,
        role: UserRole,
        client: &ClientInfo,
    ) -> AppResult<User> {
        TenantRegistry::require_active(repos, tenant_id).await?;
        let email = normalize_email(email)?;
        check_password(password)?;
        check_full_name(&profile.full_name)?;

        let password_hash = bcrypt::hash(password, config.bcrypt_cost)?;
        let ctx = TenantContext::system(tenant_id);
        let user = repos
            .users
            .insert(&ctx, NewUser { email, password_hash, role, profile })
            .await?;

        let ctx = TenantContext::for_principal(tenant_id, user.id);
        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(&ctx, actions::USER_REGISTER, "user", user.id, client),
        )
        .await;

        Ok(user)
    }

    /// Check credentials and issue a session token.
    ///
    /// Every failure is the same `Unauthorized`, whatever the cause. Each
    /// attempt is audited exactly once (the password never is).
    pub async fn authenticate(
        repos: &Repositories,
        config: &Config,
        tenant_id: Option<Uuid>,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> AppResult<(Session, User)> {
        let email = email.trim().to_lowercase();
        let matches = repos.users.find_by_email(tenant_id, &email).await?;
        let mut active = matches.iter().filter(|u| u.is_active());

        // Without a tenant hint the email must identify one principal.
        let user = match (active.next(), active.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        };

        let verified = match &user {
            Some(u) => bcrypt::verify(password, &u.password_hash).unwrap_or(false),
            None => {
                // Spend the same hashing time as a real check.
                let _ = bcrypt::hash(password, config.bcrypt_cost);
                false
            }
        };

        let tenant_ok = match &user {
            Some(u) if verified => TenantRegistry::require_active(repos, u.tenant_id).await.is_ok(),
            _ => false,
        };

        let Some(user) = user.filter(|_| verified && tenant_ok) else {
            let audit_tenant = match tenant_id {
                Some(hint) => repos.tenants.get(hint).await.ok().map(|t| t.id),
                None => matches.first().map(|u| u.tenant_id),
            };
            let entry = match audit_tenant {
                Some(tid) => {
                    let mut entry = audit::system_entry(tid, actions::LOGIN_FAILED, "user", &email);
                    entry.client_ip = client.ip.clone();
                    entry.user_agent = client.user_agent.clone();
                    entry
                }
                None => audit::unattributed_login_failure(&email, client),
            };
            AuditLog::record(repos.audit.as_ref(), entry).await;
            return Err(AppError::Unauthorized);
        };

        let session = Self::issue_token(config, &user)?;
        let ctx = TenantContext::for_principal(user.tenant_id, user.id);
        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(&ctx, actions::LOGIN, "user", user.id, client),
        )
        .await;

        Ok((session, user))
    }

    pub fn issue_token(config: &Config, user: &User) -> AppResult<Session> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            tenant: user.tenant_id.to_string(),
            role: user.role(),
            iat: now,
            exp: now + config.jwt_expiry_seconds as usize,
        };
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token signing: {e}")))?;

        Ok(Session {
            access_token,
            expires_in: config.jwt_expiry_seconds,
            claims: AuthenticatedUser {
                user_id: user.id,
                tenant_id: user.tenant_id,
                role: user.role(),
            },
        })
    }

    /// Verify signature, algorithm and expiry. Fails closed: any defect,
    /// including a claim that is not a UUID, is `Unauthorized`.
    pub fn validate(config: &Config, token: &str) -> AppResult<AuthenticatedUser> {
        let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &key, &validation)
            .map_err(|_| AppError::Unauthorized)?
            .claims;

        Ok(AuthenticatedUser {
            user_id: claims.sub.parse().map_err(|_| AppError::Unauthorized)?,
            tenant_id: claims.tenant.parse().map_err(|_| AppError::Unauthorized)?,
            role: claims.role,
        })
    }

    pub fn require_role(claims: &AuthenticatedUser, allowed: &[UserRole]) -> AppResult<()> {
        if allowed.contains(&claims.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden("insufficient role"))
        }
    }

    pub async fn me(repos: &Repositories, ctx: &TenantContext) -> AppResult<User> {
        let id = ctx.actor_id().ok_or(AppError::Unauthorized)?;
        Ok(repos.users.get(ctx, id).await?)
    }

    pub async fn change_password(
        repos: &Repositories,
        config: &Config,
        ctx: &TenantContext,
        current_password: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> AppResult<()> {
        let user = Self::me(repos, ctx).await?;
        if !bcrypt::verify(current_password, &user.password_hash).unwrap_or(false) {
            return Err(AppError::Unauthorized);
        }
        check_password(new_password)?;

        let new_hash = bcrypt::hash(new_password, config.bcrypt_cost)?;
        repos.users.set_password_hash(ctx, user.id, &new_hash).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::USER_PASSWORD_CHANGE, "user", user.id, client),
        )
        .await;
        Ok(())
    }

    /// Apply the caller's own allow-listed profile changes.
    pub async fn update_profile(
        repos: &Repositories,
        ctx: &TenantContext,
        update: &ProfileUpdate,
        client: &ClientInfo,
    ) -> AppResult<User> {
        if update.is_empty() {
            return Err(AppError::Validation("no updatable fields supplied".into()));
        }
        if let Some(name) = &update.full_name {
            check_full_name(name)?;
        }
        let id = ctx.actor_id().ok_or(AppError::Unauthorized)?;
        let user = repos.users.update_profile(ctx, id, update).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::USER_PROFILE_UPDATE, "user", user.id, client),
        )
        .await;
        Ok(user)
    }

    pub async fn list_users(repos: &Repositories, ctx: &TenantContext) -> AppResult<Vec<User>> {
        Ok(repos.users.list(ctx).await?)
    }

    pub async fn set_role(
        repos: &Repositories,
        ctx: &TenantContext,
        user_id: Uuid,
        role: UserRole,
        client: &ClientInfo,
    ) -> AppResult<User> {
        if ctx.actor_id() == Some(user_id) {
            return Err(AppError::Validation("cannot change your own role".into()));
        }
        let user = repos.users.set_role(ctx, user_id, role).await?;
        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::USER_ROLE_CHANGE, "user", user.id, client),
        )
        .await;
        Ok(user)
    }

    pub async fn set_status(
        repos: &Repositories,
        ctx: &TenantContext,
        user_id: Uuid,
        status: UserStatus,
        client: &ClientInfo,
    ) -> AppResult<User> {
        if ctx.actor_id() == Some(user_id) {
            return Err(AppError::Validation("cannot change your own status".into()));
        }
        let user = repos.users.set_status(ctx, user_id, status).await?;
        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::USER_STATUS_CHANGE, "user", user.id, client),
        )
        .await;
        Ok(user)
    }
}
