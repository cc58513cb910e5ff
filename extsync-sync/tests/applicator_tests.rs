mod common;

use common::{
    content_of, ext, id, init_tracing, seed_remote, snap, FakeEnablement, FakeGallery,
    FakeManagement, ReadOnlyStore, REMOTE_KEY,
};
use extsync_storage::{DurableStore, MemoryStore};
use extsync_sync::{
    Applicator, ApplyPlan, ExtensionEnablement, InstalledExtension, LastSyncRecord, LastSyncStore,
    MemoryRemoteStore, MergeResult, RemoteRecord, RemoteStore, SerialQueue, SyncError,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Fixture {
    management: Arc<FakeManagement>,
    gallery: Arc<FakeGallery>,
    enablement: Arc<FakeEnablement>,
    remote: Arc<MemoryRemoteStore>,
    last_sync: LastSyncStore,
    applicator: Applicator,
}

impl Fixture {
    fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStore::new()))
    }

    fn with_storage(storage: Arc<dyn DurableStore>) -> Self {
        init_tracing();
        let management = Arc::new(FakeManagement::default());
        let gallery = Arc::new(FakeGallery::default());
        let enablement = Arc::new(FakeEnablement::default());
        let remote = Arc::new(MemoryRemoteStore::new());
        let last_sync = LastSyncStore::new(storage, "lastSync/extensions.json");
        let applicator = Applicator::new(
            management.clone(),
            gallery.clone(),
            enablement.clone(),
            remote.clone(),
            last_sync.clone(),
            Arc::new(SerialQueue::new()),
            REMOTE_KEY,
        );
        Self {
            management,
            gallery,
            enablement,
            remote,
            last_sync,
            applicator,
        }
    }

    async fn remote_record(&self) -> RemoteRecord {
        self.remote.read(REMOTE_KEY, None).await.unwrap()
    }
}

fn plan(merge: MergeResult, remote_record: RemoteRecord) -> ApplyPlan {
    ApplyPlan {
        merge,
        remote_record,
        last_sync: None,
    }
}

// ── Local application ────────────────────────────────────────────

#[tokio::test]
async fn unresolvable_extension_is_skipped_and_rest_applied() {
    let f = Fixture::new();
    f.gallery.hide("pkg.baz");
    seed_remote(&f.remote, &[ext("pkg.baz", "1.0", true), ext("pkg.foo", "1.0", true)]).await;

    let merge = MergeResult {
        added: vec![ext("pkg.baz", "1.0", true), ext("pkg.foo", "1.0", true)],
        ..MergeResult::default()
    };
    let report = f
        .applicator
        .apply(plan(merge, f.remote_record().await), false)
        .await
        .unwrap();

    assert_eq!(report.skipped, vec![ext("pkg.baz", "1.0", true)]);
    assert_eq!(f.management.version_of("pkg.foo").as_deref(), Some("1.0"));
    assert_eq!(f.management.version_of("pkg.baz"), None);

    let checkpoint = f.last_sync.read().await.unwrap().unwrap();
    assert_eq!(checkpoint.skipped_extensions, vec![ext("pkg.baz", "1.0", true)]);
}

#[tokio::test]
async fn failed_install_is_skipped() {
    let f = Fixture::new();
    f.management.fail_install("pkg.bad");

    let merge = MergeResult {
        added: vec![ext("pkg.bad", "1.0", true), ext("pkg.good", "1.0", true)],
        ..MergeResult::default()
    };
    let report = f
        .applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap();

    assert_eq!(report.skipped, vec![ext("pkg.bad", "1.0", true)]);
    assert_eq!(f.management.version_of("pkg.good").as_deref(), Some("1.0"));
}

#[tokio::test]
async fn enablement_follows_entry() {
    let f = Fixture::new();
    let merge = MergeResult {
        added: vec![ext("pkg.off", "1.0", false)],
        ..MergeResult::default()
    };
    f.applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap();

    assert!(f.enablement.is_disabled("pkg.off"));
}

#[tokio::test]
async fn same_version_is_not_reinstalled() {
    let f = Fixture::new();
    f.management
        .with(InstalledExtension::user(id("pkg.foo"), "1.0"));
    f.enablement.disable(&id("pkg.foo")).await.unwrap();

    let merge = MergeResult {
        updated: vec![ext("pkg.foo", "1.0", true)],
        ..MergeResult::default()
    };
    f.applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap();

    assert!(f.management.installs().is_empty());
    assert!(!f.enablement.is_disabled("pkg.foo"));
}

#[tokio::test]
async fn new_version_is_installed() {
    let f = Fixture::new();
    f.management
        .with(InstalledExtension::user(id("pkg.foo"), "1.0"));

    let merge = MergeResult {
        updated: vec![ext("pkg.foo", "2.0", true)],
        ..MergeResult::default()
    };
    f.applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap();

    assert_eq!(f.management.installs(), vec!["pkg.foo@2.0".to_string()]);
    assert_eq!(f.management.version_of("pkg.foo").as_deref(), Some("2.0"));
}

#[tokio::test]
async fn system_extension_only_syncs_enablement() {
    let f = Fixture::new();
    f.management
        .with(InstalledExtension::system(id("builtin.theme"), "1.0"));

    let merge = MergeResult {
        updated: vec![ext("builtin.theme", "9.9", false)],
        ..MergeResult::default()
    };
    let report = f
        .applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap();

    assert!(report.skipped.is_empty());
    assert_eq!(f.gallery.lookups(), 0);
    assert!(f.management.installs().is_empty());
    assert!(f.enablement.is_disabled("builtin.theme"));
}

#[tokio::test]
async fn removal_uninstalls_user_extensions_only() {
    let f = Fixture::new();
    f.management
        .with(InstalledExtension::user(id("pkg.foo"), "1.0"))
        .with(InstalledExtension::system(id("builtin.theme"), "1.0"));

    let merge = MergeResult {
        removed: vec![id("PKG.FOO"), id("builtin.theme")],
        ..MergeResult::default()
    };
    f.applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap();

    assert_eq!(f.management.uninstalls(), vec!["pkg.foo".to_string()]);
    assert_eq!(f.management.installed().len(), 1);
}

#[tokio::test]
async fn failed_uninstall_lets_others_finish() {
    let f = Fixture::new();
    f.management.fail_uninstall("pkg.bad");
    f.management
        .with(InstalledExtension::user(id("pkg.bad"), "1.0"))
        .with(InstalledExtension::user(id("pkg.foo"), "1.0"));

    let merge = MergeResult {
        removed: vec![id("pkg.bad"), id("pkg.foo")],
        ..MergeResult::default()
    };
    let err = f
        .applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Uninstall { .. }));
    assert_eq!(f.management.version_of("pkg.foo"), None);
    assert_eq!(f.management.version_of("pkg.bad").as_deref(), Some("1.0"));
    assert_eq!(f.last_sync.read().await.unwrap(), None);
}

#[tokio::test]
async fn success_clears_skip_entry() {
    let f = Fixture::new();
    seed_remote(&f.remote, &[ext("pkg.baz", "1.0", true)]).await;

    let merge = MergeResult {
        added: vec![ext("pkg.baz", "1.0", true)],
        skipped: vec![ext("pkg.baz", "1.0", true), ext("pkg.other", "1.0", true)],
        ..MergeResult::default()
    };
    let report = f
        .applicator
        .apply(plan(merge, f.remote_record().await), false)
        .await
        .unwrap();

    assert_eq!(report.skipped, vec![ext("pkg.other", "1.0", true)]);
}

// ── Remote write and checkpoint ──────────────────────────────────

#[tokio::test]
async fn remote_write_is_conditional() {
    let f = Fixture::new();
    let stale = f.remote_record().await;
    seed_remote(&f.remote, &[ext("pkg.other", "1.0", true)]).await;

    let merge = MergeResult {
        remote: Some(snap(&[ext("pkg.foo", "1.0", true)])),
        ..MergeResult::default()
    };
    let err = f.applicator.apply(plan(merge, stale), false).await.unwrap_err();

    assert!(matches!(err, SyncError::Conflict { .. }));
    assert_eq!(f.last_sync.read().await.unwrap(), None);
    assert_eq!(
        f.remote.current(REMOTE_KEY).await.content,
        Some(content_of(&[ext("pkg.other", "1.0", true)]))
    );
}

#[tokio::test]
async fn forced_write_ignores_stale_ref() {
    let f = Fixture::new();
    let stale = f.remote_record().await;
    seed_remote(&f.remote, &[ext("pkg.other", "1.0", true)]).await;

    let merge = MergeResult {
        remote: Some(snap(&[ext("pkg.foo", "1.0", true)])),
        ..MergeResult::default()
    };
    let report = f.applicator.apply(plan(merge, stale), true).await.unwrap();

    assert!(report.remote_written);
    assert!(report.checkpoint_written);
    assert_eq!(
        f.remote.current(REMOTE_KEY).await,
        report.remote_record
    );
}

#[tokio::test]
async fn checkpoint_tracks_written_remote() {
    let f = Fixture::new();
    let merge = MergeResult {
        remote: Some(snap(&[ext("pkg.foo", "1.0", true)])),
        ..MergeResult::default()
    };
    let report = f
        .applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap();

    let checkpoint = f.last_sync.read().await.unwrap().unwrap();
    assert_eq!(checkpoint.remote_record(), report.remote_record);
    assert_eq!(checkpoint.remote_record(), f.remote.current(REMOTE_KEY).await);
}

#[tokio::test]
async fn unchanged_checkpoint_is_not_rewritten() {
    let f = Fixture::new();
    seed_remote(&f.remote, &[ext("pkg.foo", "1.0", true)]).await;
    let record = f.remote_record().await;
    let previous = LastSyncRecord::from_remote(&record, Vec::new());

    let plan = ApplyPlan {
        merge: MergeResult::default(),
        remote_record: record,
        last_sync: Some(previous),
    };
    let report = f.applicator.apply(plan, false).await.unwrap();

    assert!(!report.remote_written);
    assert!(!report.checkpoint_written);
    assert_eq!(f.last_sync.read().await.unwrap(), None);
}

#[tokio::test]
async fn nothing_written_without_remote_content() {
    let f = Fixture::new();
    let report = f
        .applicator
        .apply(plan(MergeResult::default(), RemoteRecord::empty()), false)
        .await
        .unwrap();

    assert!(!report.remote_written);
    assert!(!report.checkpoint_written);
    assert_eq!(f.remote.write_count(), 0);
}

#[tokio::test]
async fn checkpoint_failure_comes_after_remote_write() {
    let f = Fixture::with_storage(Arc::new(ReadOnlyStore));
    let merge = MergeResult {
        remote: Some(snap(&[ext("pkg.foo", "1.0", true)])),
        ..MergeResult::default()
    };
    let err = f
        .applicator
        .apply(plan(merge, RemoteRecord::empty()), false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Storage(_)));
    assert_eq!(f.remote.write_count(), 1);
}
