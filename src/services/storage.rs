use std::{
    collections::HashMap,
    future::Future,
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Key-value object store holding evidence bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> AppResult<()>;

    /// `NotFound` when no object is stored under `key`.
    async fn get(&self, key: &str) -> AppResult<Vec<u8>>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> AppResult<()>;

    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Time-limited URL that serves the object without a bearer token.
    fn presign(&self, key: &str, ttl: Duration) -> AppResult<String>;
}

/// Signs and checks `(key, expiry)` pairs for presigned URLs.
#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: &str, base_url: &str) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::Configuration("storage signing key is not configured".into()));
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Configuration(format!("storage signing key: {e}")))?;
        Ok(Self {
            mac,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    pub fn sign(&self, key: &str, expires: i64) -> String {
        hex::encode(self.mac(key, expires).finalize().into_bytes())
    }

    pub fn url(&self, key: &str, ttl: Duration) -> String {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        format!(
            "{}/evidence/files/{}?expires={}&signature={}",
            self.base_url,
            key,
            expires,
            self.sign(key, expires)
        )
    }

    /// Constant-time signature check followed by the expiry check.
    /// Every failure is `Unauthorized`.
    pub fn verify(&self, key: &str, expires: i64, signature: &str) -> AppResult<()> {
        let sig = hex::decode(signature).map_err(|_| AppError::Unauthorized)?;
        self.mac(key, expires)
            .verify_slice(&sig)
            .map_err(|_| AppError::Unauthorized)?;
        if expires < Utc::now().timestamp() {
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }
}

/// Keys are relative `/`-separated paths; anything that could escape the
/// storage root is refused.
pub fn validate_key(key: &str) -> AppResult<()> {
    let clean = !key.is_empty()
        && !key.contains('\\')
        && key.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        && Path::new(key).components().all(|c| matches!(c, Component::Normal(_)));
    if clean {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid storage key: {key}")))
    }
}

/// Blob store on the local filesystem, one file per key under `root`.
pub struct FsBlobStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self { root: root.into(), signer }
    }

    /// Create the root directory. Safe to call on every startup.
    pub async fn ensure_root(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AppError::UpstreamStorage(format!("create {}: {e}", self.root.display())))
    }

    fn path(&self, key: &str) -> AppResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_error(key: &str, e: std::io::Error) -> AppError {
    if e.kind() == std::io::ErrorKind::NotFound {
        AppError::NotFound("evidence file")
    } else {
        AppError::UpstreamStorage(format!("{key}: {e}"))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> AppResult<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::UpstreamStorage(format!("{key}: {e}")))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| AppError::UpstreamStorage(format!("{key}: {e}")))
    }

    async fn get(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.path(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_error(key, e))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::UpstreamStorage(format!("{key}: {e}"))),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::UpstreamStorage(format!("{key}: {e}")))
    }

    fn presign(&self, key: &str, ttl: Duration) -> AppResult<String> {
        validate_key(key)?;
        Ok(self.signer.url(key, ttl))
    }
}

/// In-process blob store for tests and local runs.
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    unavailable: AtomicBool,
    signer: UrlSigner,
}

impl MemoryBlobStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            signer,
        }
    }

    /// Simulate an outage: every call fails with `UpstreamStorage` until reset.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(AppError::UpstreamStorage("blob store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> AppResult<()> {
        self.check()?;
        validate_key(key)?;
        self.objects
            .write()
            .insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Vec<u8>> {
        self.check()?;
        self.objects
            .read()
            .get(key)
            .map(|(b, _)| b.clone())
            .ok_or(AppError::NotFound("evidence file"))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.check()?;
        self.objects.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        self.check()?;
        Ok(self.objects.read().contains_key(key))
    }

    fn presign(&self, key: &str, ttl: Duration) -> AppResult<String> {
        validate_key(key)?;
        Ok(self.signer.url(key, ttl))
    }
}

/// Bound a blob-store call by `limit`; elapsed calls become `UpstreamStorage`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::UpstreamStorage(format!("timed out after {}s", limit.as_secs())))?
}

/// Reads are idempotent, so an upstream failure is retried once after a short
/// backoff. Writes go through `with_timeout` only.
pub async fn get_with_retry(store: &dyn BlobStore, key: &str, limit: Duration) -> AppResult<Vec<u8>> {
    match with_timeout(limit, store.get(key)).await {
        Err(AppError::UpstreamStorage(e)) => {
            tracing::warn!(key, "blob read failed, retrying once: {e}");
            tokio::time::sleep(READ_RETRY_BACKOFF).await;
            with_timeout(limit, store.get(key)).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("signing-secret", "http://localhost:8080/").unwrap()
    }

    #[test]
    fn keys_cannot_escape_the_root() {
        assert!(validate_key("t/v/abc.png").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("t/./v").is_err());
        assert!(validate_key("t\\..\\v").is_err());
    }

    #[test]
    fn signatures_bind_key_and_expiry() {
        let s = signer();
        let exp = Utc::now().timestamp() + 60;
        let sig = s.sign("t/v/a.png", exp);

        assert!(s.verify("t/v/a.png", exp, &sig).is_ok());
        assert!(matches!(s.verify("t/v/b.png", exp, &sig), Err(AppError::Unauthorized)));
        assert!(matches!(s.verify("t/v/a.png", exp + 1, &sig), Err(AppError::Unauthorized)));
        assert!(matches!(s.verify("t/v/a.png", exp, "nothex"), Err(AppError::Unauthorized)));

        let other = UrlSigner::new("another-secret", "http://x").unwrap();
        assert!(other.verify("t/v/a.png", exp, &sig).is_err());
    }

    #[test]
    fn expired_signatures_are_rejected() {
        let s = signer();
        let exp = Utc::now().timestamp() - 1;
        let sig = s.sign("t/v/a.png", exp);
        assert!(matches!(s.verify("t/v/a.png", exp, &sig), Err(AppError::Unauthorized)));
    }

    #[test]
    fn presigned_url_shape() {
        let url = signer().url("t/v/a.png", Duration::from_secs(300));
        assert!(url.starts_with("http://localhost:8080/evidence/files/t/v/a.png?expires="));
        assert!(url.contains("&signature="));
    }

    #[tokio::test]
    async fn fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), signer());
        store.ensure_root().await.unwrap();

        let key = "tenant/verification/file.bin";
        assert!(!store.exists(key).await.unwrap());
        store.put(key, Bytes::from_static(b"hello"), "application/octet-stream").await.unwrap();
        assert!(store.exists(key).await.unwrap());
        assert_eq!(store.get(key).await.unwrap(), b"hello");

        store.delete(key).await.unwrap();
        store.delete(key).await.unwrap();
        assert!(matches!(store.get(key).await, Err(AppError::NotFound(_))));
        assert!(store.get("../outside").await.is_err());
    }

    #[tokio::test]
    async fn outage_surfaces_as_upstream_error() {
        let store = MemoryBlobStore::new(signer());
        store.put("a/b", Bytes::from_static(b"x"), "text/plain").await.unwrap();
        store.set_unavailable(true);

        let err = get_with_retry(&store, "a/b", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamStorage(_)));

        store.set_unavailable(false);
        assert_eq!(get_with_retry(&store, "a/b", Duration::from_secs(1)).await.unwrap(), b"x");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let err = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::UpstreamStorage(_)));
    }
}
