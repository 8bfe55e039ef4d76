use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub bcrypt_cost: u32,
    pub host: String,
    pub port: u16,
    /// Hex-encoded 32-byte master key for PII encryption.
    pub pii_encryption_key: String,
    pub pii_key_version: u8,
    /// Older key versions kept for decryption only ("version:hex,version:hex").
    pub pii_retired_keys: Option<String>,
    pub storage_dir: String,
    pub storage_signing_key: String,
    pub storage_timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub presign_default_ttl_secs: u64,
    pub presign_max_ttl_secs: u64,
    pub public_base_url: String,
    pub default_tenant_name: Option<String>,
    /// Shared secret for the `/operator` routes; they are disabled when unset.
    pub operator_key: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "3600".into())
                .parse()?,
            bcrypt_cost: env::var("BCRYPT_COST")
                .unwrap_or_else(|_| "12".into())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            pii_encryption_key: required("PII_ENCRYPTION_KEY")?,
            pii_key_version: env::var("PII_KEY_VERSION")
                .unwrap_or_else(|_| "1".into())
                .parse()?,
            pii_retired_keys: env::var("PII_RETIRED_KEYS").ok().filter(|s| !s.is_empty()),
            storage_dir: env::var("STORAGE_DIR").unwrap_or_else(|_| "/data/evidence".into()),
            storage_signing_key: required("STORAGE_SIGNING_KEY")?,
            storage_timeout_secs: env::var("STORAGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
                .parse()?,
            presign_default_ttl_secs: env::var("PRESIGN_DEFAULT_TTL_SECS")
                .unwrap_or_else(|_| "3600".into())
                .parse()?,
            presign_max_ttl_secs: env::var("PRESIGN_MAX_TTL_SECS")
                .unwrap_or_else(|_| "86400".into())
                .parse()?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            default_tenant_name: env::var("DEFAULT_TENANT_NAME").ok().filter(|s| !s.is_empty()),
            operator_key: env::var("OPERATOR_KEY").ok().filter(|s| !s.is_empty()),
        })
    }

    /// Settings suitable for tests and local runs against in-memory stores.
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            redis_url: None,
            jwt_secret: "test-jwt-secret".into(),
            jwt_expiry_seconds: 3600,
            bcrypt_cost: 4,
            host: "127.0.0.1".into(),
            port: 0,
            pii_encryption_key: "11".repeat(32),
            pii_key_version: 1,
            pii_retired_keys: None,
            storage_dir: String::new(),
            storage_signing_key: "test-storage-signing-key".into(),
            storage_timeout_secs: 5,
            max_upload_bytes: 10 * 1024 * 1024,
            presign_default_ttl_secs: 3600,
            presign_max_ttl_secs: 86400,
            public_base_url: "http://localhost:8080".into(),
            default_tenant_name: None,
            operator_key: Some("test-operator-key".into()),
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required env var: {}", key))
}
