use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use kyc_vault::{
    config::Config,
    error::AppError,
    models::{
        auth::ClientInfo,
        tenant::TenantContext,
        user::{ProfileFields, UserRole},
        verification::PiiFields,
    },
    repository::{memory::MemoryStore, Repositories},
    services::{
        audit::actions,
        auth::AuthService,
        encryption::PiiCipher,
        evidence::{EvidenceService, Upload},
        storage::{MemoryBlobStore, UrlSigner},
        tenants::TenantRegistry,
        verifications::VerificationService,
    },
};
use uuid::Uuid;

struct World {
    store: Arc<MemoryStore>,
    repos: Repositories,
    blobs: MemoryBlobStore,
    cipher: PiiCipher,
    config: Config,
}

impl World {
    fn new() -> Self {
        let config = Config::for_tests();
        let store = Arc::new(MemoryStore::new());
        Self {
            repos: Repositories::from_memory(store.clone()),
            blobs: MemoryBlobStore::new(UrlSigner::new(&config.storage_signing_key, &config.public_base_url).unwrap()),
            cipher: PiiCipher::from_config(&config).unwrap(),
            store,
            config,
        }
    }

    /// Create a tenant with one user and log that user in.
    async fn onboard(&self, tenant: &str, email: &str, password: &str) -> TenantContext {
        let t = TenantRegistry::create(&self.repos, tenant).await.unwrap();
        AuthService::register(
            &self.repos,
            &self.config,
            t.id,
            email,
            password,
            ProfileFields { full_name: email.into(), ..Default::default() },
            UserRole::User,
            &ClientInfo::default(),
        )
        .await
        .unwrap();

        let (session, _) = AuthService::authenticate(&self.repos, &self.config, None, email, password, &ClientInfo::default())
            .await
            .unwrap();
        let claims = AuthService::validate(&self.config, &session.access_token).unwrap();
        assert_eq!(claims.tenant_id, t.id);
        TenantContext::for_principal(claims.tenant_id, claims.user_id)
    }

    fn count(&self, action: &str) -> usize {
        self.store.raw_audit().iter().filter(|e| e.action == action).count()
    }
}

fn pii(name: &str) -> PiiFields {
    PiiFields {
        full_name: name.into(),
        dob: "1988-11-02".into(),
        id_number: format!("ID-{name}"),
        address: None,
        phone: Some("+1 555 0100".into()),
    }
}

fn file(len: usize) -> Upload {
    Upload {
        bytes: Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>()),
        content_type: Some("application/pdf".into()),
        filename: Some("statement.pdf".into()),
    }
}

#[tokio::test]
async fn acme_and_globex() {
    let w = World::new();
    let c = ClientInfo::default();
    let alice = w.onboard("acme", "alice@acme.test", "secret123").await;
    let bob = w.onboard("globex", "bob@globex.test", "hunter2000").await;

    // Passwords are stored only as salted hashes.
    for u in w.store.raw_users() {
        assert!(!u.password_hash.contains("secret123"));
        assert!(!u.password_hash.contains("hunter2000"));
    }

    let v = VerificationService::create(&w.repos, &alice, "applicant-7", &c).await.unwrap();
    VerificationService::attach_pii(&w.repos, &w.cipher, &alice, v.id, &pii("Alice Subject"), &c)
        .await
        .unwrap();

    // Bob cannot see alice's verification, by any route.
    assert!(matches!(VerificationService::get(&w.repos, &bob, v.id).await, Err(AppError::NotFound(_))));
    assert!(matches!(
        VerificationService::read_pii(&w.repos, &w.cipher, &bob, v.id, &c).await,
        Err(AppError::NotFound(_))
    ));

    // 15 MB against a 10 MB limit.
    assert_eq!(w.config.max_upload_bytes, 10 * 1024 * 1024);
    let big = EvidenceService::upload(&w.repos, &w.blobs, &w.config, &alice, v.id, file(15 * 1024 * 1024), &c).await;
    assert!(matches!(big, Err(AppError::PayloadTooLarge { .. })));

    // 1 KB round trip.
    let small = file(1024);
    let expected = small.bytes.clone();
    let ev = EvidenceService::upload(&w.repos, &w.blobs, &w.config, &alice, v.id, small, &c).await.unwrap();
    let downloaded = EvidenceService::download(&w.repos, &w.blobs, Duration::from_secs(1), &alice, ev.id, &c)
        .await
        .unwrap();
    assert_eq!(downloaded.bytes, expected.to_vec());
    assert_eq!(downloaded.media_type, "application/pdf");
    assert!(matches!(
        EvidenceService::download(&w.repos, &w.blobs, Duration::from_secs(1), &bob, ev.id, &c).await,
        Err(AppError::NotFound(_))
    ));

    // Every PII read and login attempt leaves exactly one event.
    let reads_before = w.count(actions::PII_READ);
    VerificationService::read_pii(&w.repos, &w.cipher, &alice, v.id, &c).await.unwrap();
    assert_eq!(w.count(actions::PII_READ), reads_before + 1);

    let logins_before = w.count(actions::LOGIN) + w.count(actions::LOGIN_FAILED);
    let _ = AuthService::authenticate(&w.repos, &w.config, None, "alice@acme.test", "wrong-password", &c).await;
    let _ = AuthService::authenticate(&w.repos, &w.config, None, "alice@acme.test", "secret123", &c).await;
    assert_eq!(w.count(actions::LOGIN) + w.count(actions::LOGIN_FAILED), logins_before + 2);

    // Cascade delete leaves no PII, evidence rows or blobs behind.
    VerificationService::delete(&w.repos, &w.blobs, Duration::from_secs(1), &alice, v.id, &c)
        .await
        .unwrap();
    assert!(w.store.raw_pii().is_empty());
    assert!(w.store.raw_evidence().is_empty());
    assert!(w.blobs.is_empty());

    // Alice's actions are only ever recorded under acme.
    for e in w.store.raw_audit() {
        if e.actor_id == alice.actor_id() {
            assert_eq!(e.tenant_id, Some(alice.tenant_id()));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tenants_never_observe_each_other() {
    let w = Arc::new(World::new());
    let mut handles = Vec::new();

    for i in 0..8 {
        let w = w.clone();
        handles.push(tokio::spawn(async move {
            let ctx = w.onboard(&format!("tenant-{i}"), &format!("user{i}@t{i}.test"), "password-ok").await;
            let c = ClientInfo::default();
            let mut mine = Vec::new();
            for n in 0..10 {
                let v = VerificationService::create(&w.repos, &ctx, &format!("s-{i}-{n}"), &c).await.unwrap();
                VerificationService::attach_pii(&w.repos, &w.cipher, &ctx, v.id, &pii(&format!("t{i}n{n}")), &c)
                    .await
                    .unwrap();
                mine.push(v.id);
            }
            (ctx, mine)
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.push(h.await.unwrap());
    }

    for (i, (ctx, mine)) in all.iter().enumerate() {
        let listed = VerificationService::list(&w.repos, ctx).await.unwrap();
        assert_eq!(listed.len(), mine.len());
        assert!(listed.iter().all(|v| v.tenant_id == ctx.tenant_id()));

        for (j, (_, theirs)) in all.iter().enumerate() {
            for id in theirs {
                let read = VerificationService::read_pii(&w.repos, &w.cipher, ctx, *id, &ClientInfo::default()).await;
                if i == j {
                    assert!(read.unwrap().full_name.starts_with(&format!("t{i}n")));
                } else {
                    assert!(matches!(read, Err(AppError::NotFound(_))));
                }
            }
        }
    }
}

#[tokio::test]
async fn unknown_tenant_in_token_is_forbidden_not_defaulted() {
    let w = World::new();
    TenantRegistry::resolve_or_create_default(&w.repos, "default").await.unwrap();
    let err = TenantRegistry::require_active(&w.repos, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}
