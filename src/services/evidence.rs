use std::{path::Path, time::Duration};

use bytes::Bytes;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{
        auth::ClientInfo,
        evidence::{EvidenceObject, NewEvidence, PresignedUrl},
        tenant::TenantContext,
    },
    repository::Repositories,
    services::{
        audit::{self, actions, AuditLog},
        storage::{self, BlobStore, UrlSigner},
    },
};

/// One upload as received from the client.
pub struct Upload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Media types accepted as evidence, with the extension used in storage keys.
/// Nothing here renders as active content in a browser.
const ALLOWED_MEDIA_TYPES: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("image/gif", "gif"),
    ("image/heic", "heic"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/tiff", "tiff"),
    ("image/webp", "webp"),
];

fn key_extension(media_type: &str) -> Option<&'static str> {
    ALLOWED_MEDIA_TYPES
        .iter()
        .find(|(m, _)| *m == media_type)
        .map(|(_, ext)| *ext)
}

/// Declared media type of the upload, falling back to a guess from the
/// filename, accepted only when it is on the allow-list.
fn media_type(upload: &Upload) -> AppResult<(String, &'static str)> {
    let declared = upload
        .content_type
        .as_deref()
        .and_then(|c| c.split(';').next())
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty() && c != "application/octet-stream");
    let media_type = declared
        .or_else(|| {
            upload
                .filename
                .as_deref()
                .and_then(|f| mime_guess::from_path(f).first())
                .map(|m| m.essence_str().to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    match key_extension(&media_type) {
        Some(ext) => Ok((media_type, ext)),
        None => Err(AppError::UnsupportedMediaType(media_type)),
    }
}

fn clean_filename(name: Option<&str>) -> Option<String> {
    name.and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(|n| n.chars().take(255).collect())
}

/// Evidence bytes ready to be served, with the media type recorded at upload.
#[derive(Debug)]
pub struct EvidenceFile {
    pub bytes: Vec<u8>,
    pub media_type: String,
    /// Last segment of the storage key; safe to put in a header.
    pub file_name: String,
}

impl EvidenceFile {
    fn new(bytes: Vec<u8>, row: EvidenceObject) -> Self {
        let file_name = row
            .object_key
            .rsplit('/')
            .next()
            .unwrap_or(row.object_key.as_str())
            .to_string();
        Self { bytes, media_type: row.media_type, file_name }
    }
}

pub struct EvidenceService;

impl EvidenceService {
    /// Store an evidence blob and then its pointer row.
    ///
    /// The row is written only after the blob write succeeded. If the row
    /// insert fails afterwards the blob is left as an orphan for cleanup.
    pub async fn upload(
        repos: &Repositories,
        blobs: &dyn BlobStore,
        config: &Config,
        ctx: &TenantContext,
        verification_id: Uuid,
        upload: Upload,
        client: &ClientInfo,
    ) -> AppResult<EvidenceObject> {
        if upload.bytes.len() > config.max_upload_bytes {
            return Err(AppError::PayloadTooLarge { limit: config.max_upload_bytes });
        }
        if upload.bytes.is_empty() {
            return Err(AppError::Validation("empty upload".into()));
        }
        let (media_type, extension) = media_type(&upload)?;
        repos.verifications.get(ctx, verification_id).await?;

        let object_key = format!("{}/{}/{}.{extension}", ctx.tenant_id(), verification_id, Uuid::new_v4());
        let size_bytes = upload.bytes.len() as i64;
        let timeout = Duration::from_secs(config.storage_timeout_secs);

        storage::with_timeout(timeout, blobs.put(&object_key, upload.bytes, &media_type)).await?;

        let row = repos
            .evidence
            .insert(
                ctx,
                NewEvidence {
                    verification_id,
                    object_key: object_key.clone(),
                    media_type,
                    size_bytes,
                    original_filename: clean_filename(upload.filename.as_deref()),
                },
            )
            .await
            .map_err(|e| {
                tracing::warn!(key = %object_key, "evidence row insert failed, blob left orphaned: {e}");
                AppError::from(e)
            })?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::EVIDENCE_UPLOAD, "evidence", row.id, client),
        )
        .await;
        Ok(row)
    }

    pub async fn list(
        repos: &Repositories,
        ctx: &TenantContext,
        verification_id: Uuid,
    ) -> AppResult<Vec<EvidenceObject>> {
        Ok(repos.evidence.list_for_verification(ctx, verification_id).await?)
    }

    pub async fn download(
        repos: &Repositories,
        blobs: &dyn BlobStore,
        storage_timeout: Duration,
        ctx: &TenantContext,
        evidence_id: Uuid,
        client: &ClientInfo,
    ) -> AppResult<EvidenceFile> {
        let row = repos.evidence.get(ctx, evidence_id).await?;
        let bytes = storage::get_with_retry(blobs, &row.object_key, storage_timeout).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::EVIDENCE_DOWNLOAD, "evidence", row.id, client),
        )
        .await;
        Ok(EvidenceFile::new(bytes, row))
    }

    /// `ttl_secs` falls back to the configured default and is capped at the
    /// configured maximum.
    pub async fn presigned_url(
        repos: &Repositories,
        blobs: &dyn BlobStore,
        config: &Config,
        ctx: &TenantContext,
        evidence_id: Uuid,
        ttl_secs: Option<u64>,
        client: &ClientInfo,
    ) -> AppResult<PresignedUrl> {
        let row = repos.evidence.get(ctx, evidence_id).await?;
        let ttl = ttl_secs
            .unwrap_or(config.presign_default_ttl_secs)
            .clamp(1, config.presign_max_ttl_secs);
        let url = blobs.presign(&row.object_key, Duration::from_secs(ttl))?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::EVIDENCE_PRESIGN, "evidence", row.id, client),
        )
        .await;
        Ok(PresignedUrl {
            evidence_id: row.id,
            url,
            expires_in: ttl,
            media_type: row.media_type,
        })
    }

    /// Remove the pointer row, then the blob. A failed blob delete leaves an
    /// orphan, never a row pointing at nothing.
    pub async fn delete(
        repos: &Repositories,
        blobs: &dyn BlobStore,
        storage_timeout: Duration,
        ctx: &TenantContext,
        evidence_id: Uuid,
        client: &ClientInfo,
    ) -> AppResult<()> {
        let row = repos.evidence.delete(ctx, evidence_id).await?;

        AuditLog::record(
            repos.audit.as_ref(),
            audit::entry(ctx, actions::EVIDENCE_DELETE, "evidence", row.id, client),
        )
        .await;

        if let Err(e) = storage::with_timeout(storage_timeout, blobs.delete(&row.object_key)).await {
            tracing::warn!(key = %row.object_key, "evidence blob delete failed: {e}");
        }
        Ok(())
    }

    /// Serve a blob through a presigned URL. The signature is the only
    /// credential; the owning tenant is read from the key prefix and the row
    /// is looked up under it, so the stored media type is what gets served.
    pub async fn fetch_signed(
        repos: &Repositories,
        blobs: &dyn BlobStore,
        signer: &UrlSigner,
        storage_timeout: Duration,
        key: &str,
        expires: i64,
        signature: &str,
        client: &ClientInfo,
    ) -> AppResult<EvidenceFile> {
        signer.verify(key, expires, signature)?;
        storage::validate_key(key)?;

        let tenant_id = key
            .split('/')
            .next()
            .and_then(|t| t.parse::<Uuid>().ok())
            .ok_or(AppError::NotFound("evidence"))?;
        let ctx = TenantContext::system(tenant_id);
        let row = repos.evidence.find_by_key(&ctx, key).await?;
        let bytes = storage::get_with_retry(blobs, &row.object_key, storage_timeout).await?;

        let mut entry = audit::system_entry(tenant_id, actions::EVIDENCE_DOWNLOAD, "evidence", row.id);
        entry.client_ip = client.ip.clone();
        entry.user_agent = client.user_agent.clone();
        AuditLog::record(repos.audit.as_ref(), entry).await;

        Ok(EvidenceFile::new(bytes, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::verification::Verification,
        repository::memory::MemoryStore,
        services::{storage::MemoryBlobStore, tenants::TenantRegistry, verifications::VerificationService},
    };
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemoryStore>,
        repos: Repositories,
        blobs: MemoryBlobStore,
        signer: UrlSigner,
        config: Config,
        acme: TenantContext,
        globex: TenantContext,
        v: Verification,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let repos = Repositories::from_memory(store.clone());
        let config = Config::for_tests();
        let signer = UrlSigner::new(&config.storage_signing_key, &config.public_base_url).unwrap();
        let blobs = MemoryBlobStore::new(signer.clone());
        let acme = TenantContext::for_principal(TenantRegistry::create(&repos, "acme").await.unwrap().id, Uuid::new_v4());
        let globex =
            TenantContext::for_principal(TenantRegistry::create(&repos, "globex").await.unwrap().id, Uuid::new_v4());
        let v = VerificationService::create(&repos, &acme, "subject", &ClientInfo::default()).await.unwrap();
        Fixture { store, repos, blobs, signer, config, acme, globex, v }
    }

    fn upload(len: usize) -> Upload {
        Upload {
            bytes: Bytes::from(vec![7u8; len]),
            content_type: Some("image/png".into()),
            filename: Some("passport.PNG".into()),
        }
    }

    fn named(content_type: Option<&str>, filename: Option<&str>) -> Upload {
        Upload {
            bytes: Bytes::from_static(b"x"),
            content_type: content_type.map(str::to_string),
            filename: filename.map(str::to_string),
        }
    }

    #[test]
    fn extensions_follow_the_accepted_media_type() {
        let ok = |u: Upload| media_type(&u).unwrap();
        assert_eq!(ok(named(Some("application/pdf"), Some("scan.exe"))), ("application/pdf".into(), "pdf"));
        assert_eq!(ok(named(Some("IMAGE/JPEG; q=1"), None)), ("image/jpeg".into(), "jpg"));
        assert_eq!(ok(named(None, Some("../../id.JPG"))), ("image/jpeg".into(), "jpg"));
        assert_eq!(ok(named(Some("application/octet-stream"), Some("id.png"))), ("image/png".into(), "png"));

        for (ct, name) in [
            (Some("text/html"), Some("scan.png")),
            (Some("image/svg+xml"), Some("logo.svg")),
            (None, Some("scan.html")),
            (None, None),
        ] {
            assert!(matches!(media_type(&named(ct, name)), Err(AppError::UnsupportedMediaType(_))));
        }
    }

    #[tokio::test]
    async fn client_filename_never_picks_the_served_type() {
        let f = fixture().await;
        let c = ClientInfo::default();
        let html = Upload {
            bytes: Bytes::from_static(b"<script>alert(1)</script>"),
            content_type: Some("image/png".into()),
            filename: Some("scan.html".into()),
        };
        let row = EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.acme, f.v.id, html, &c)
            .await
            .unwrap();
        assert!(row.object_key.ends_with(".png"));

        let t = Duration::from_secs(1);
        let direct = EvidenceService::download(&f.repos, &f.blobs, t, &f.acme, row.id, &c).await.unwrap();
        let url = EvidenceService::presigned_url(&f.repos, &f.blobs, &f.config, &f.acme, row.id, None, &c)
            .await
            .unwrap()
            .url;
        let (key, expires, signature) = signed_parts(&url);
        let signed = EvidenceService::fetch_signed(&f.repos, &f.blobs, &f.signer, t, &key, expires, &signature, &c)
            .await
            .unwrap();
        assert_eq!(direct.media_type, "image/png");
        assert_eq!(signed.media_type, direct.media_type);
        assert_eq!(signed.file_name, direct.file_name);
        assert!(signed.file_name.ends_with(".png"));

        let rejected = Upload {
            bytes: Bytes::from_static(b"<html></html>"),
            content_type: Some("text/html".into()),
            filename: Some("scan.png".into()),
        };
        let err = EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.acme, f.v.id, rejected, &c).await;
        assert!(matches!(err, Err(AppError::UnsupportedMediaType(_))));
        assert_eq!(f.blobs.len(), 1);
    }

    /// Split a presigned URL into key, expiry and signature.
    fn signed_parts(url: &str) -> (String, i64, String) {
        let (path, query) = url.split_once('?').unwrap();
        let key = path.split_once("/evidence/files/").unwrap().1.to_string();
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v.to_string(),
                _ => {}
            }
        }
        (key, expires, signature)
    }

    #[tokio::test]
    async fn upload_and_download_round_trip() {
        let f = fixture().await;
        let row = EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.acme, f.v.id, upload(1024), &ClientInfo::default())
            .await
            .unwrap();

        let prefix = format!("{}/{}/", f.acme.tenant_id(), f.v.id);
        assert!(row.object_key.starts_with(&prefix));
        assert!(row.object_key.ends_with(".png"));
        assert_eq!(row.size_bytes, 1024);
        assert_eq!(row.original_filename.as_deref(), Some("passport.PNG"));

        let file = EvidenceService::download(
            &f.repos, &f.blobs, Duration::from_secs(1), &f.acme, row.id, &ClientInfo::default(),
        )
        .await
        .unwrap();
        assert_eq!(file.bytes, vec![7u8; 1024]);
        assert_eq!(file.media_type, "image/png");

        let listed = EvidenceService::list(&f.repos, &f.acme, f.v.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected_before_storage() {
        let f = fixture().await;
        let err = EvidenceService::upload(
            &f.repos, &f.blobs, &f.config, &f.acme, f.v.id,
            upload(f.config.max_upload_bytes + 1), &ClientInfo::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));
        assert!(f.blobs.is_empty());
        assert!(f.store.raw_evidence().is_empty());
    }

    #[tokio::test]
    async fn failed_blob_write_leaves_no_row() {
        let f = fixture().await;
        f.blobs.set_unavailable(true);
        let err = EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.acme, f.v.id, upload(10), &ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UpstreamStorage(_)));
        assert!(f.store.raw_evidence().is_empty());
    }

    #[tokio::test]
    async fn foreign_tenant_sees_nothing() {
        let f = fixture().await;
        let c = ClientInfo::default();
        let row = EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.acme, f.v.id, upload(10), &c)
            .await
            .unwrap();
        let t = Duration::from_secs(1);

        assert!(matches!(
            EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.globex, f.v.id, upload(10), &c).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            EvidenceService::download(&f.repos, &f.blobs, t, &f.globex, row.id, &c).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            EvidenceService::presigned_url(&f.repos, &f.blobs, &f.config, &f.globex, row.id, None, &c).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            EvidenceService::delete(&f.repos, &f.blobs, t, &f.globex, row.id, &c).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            EvidenceService::list(&f.repos, &f.globex, f.v.id).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(f.blobs.len(), 1);
    }

    #[tokio::test]
    async fn presigned_urls_are_clamped_and_servable() {
        let f = fixture().await;
        let c = ClientInfo::default();
        let row = EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.acme, f.v.id, upload(16), &c)
            .await
            .unwrap();

        let p = EvidenceService::presigned_url(&f.repos, &f.blobs, &f.config, &f.acme, row.id, Some(10_000_000), &c)
            .await
            .unwrap();
        assert_eq!(p.expires_in, f.config.presign_max_ttl_secs);

        let (key, expires, signature) = signed_parts(&p.url);
        let t = Duration::from_secs(1);
        let file = EvidenceService::fetch_signed(&f.repos, &f.blobs, &f.signer, t, &key, expires, &signature, &c)
            .await
            .unwrap();
        assert_eq!(file.bytes.len(), 16);
        assert_eq!(file.media_type, "image/png");

        // Signed downloads are recorded against the row, like direct ones.
        let last = f.store.raw_audit().pop().unwrap();
        assert_eq!(last.action, actions::EVIDENCE_DOWNLOAD);
        assert_eq!(last.target_type, "evidence");
        assert_eq!(last.target_id, row.id.to_string());
        assert_eq!(last.tenant_id, Some(f.acme.tenant_id()));

        let tampered = EvidenceService::fetch_signed(&f.repos, &f.blobs, &f.signer, t, &key, expires + 1, &signature, &c).await;
        assert!(matches!(tampered, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn delete_removes_row_then_blob() {
        let f = fixture().await;
        let c = ClientInfo::default();
        let row = EvidenceService::upload(&f.repos, &f.blobs, &f.config, &f.acme, f.v.id, upload(10), &c)
            .await
            .unwrap();
        EvidenceService::delete(&f.repos, &f.blobs, Duration::from_secs(1), &f.acme, row.id, &c)
            .await
            .unwrap();
        assert!(f.blobs.is_empty());
        assert!(f.store.raw_evidence().is_empty());

        let seen: Vec<String> = f.store.raw_audit().into_iter().map(|e| e.action).collect();
        assert!(seen.contains(&actions::EVIDENCE_UPLOAD.to_string()));
        assert!(seen.contains(&actions::EVIDENCE_DELETE.to_string()));
    }
}
