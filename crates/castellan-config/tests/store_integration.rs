//! End-to-end behaviour of the configuration store against a realistic
//! media server document.

use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;

use castellan_config::{
    Action, BuiltIn, ConfigError, ConfigStore, ConfigStoreOptions, LockPolicy, Permission,
    Protocol, ProtocolPatch, Secret, StreamingUser, StreamingUserRegistry, StructuredPatch,
    UserSelector,
};
use castellan_test_support::{ConsoleLayout, SAMPLE_CONFIG};

type TestResult<T> = Result<T, Box<dyn Error>>;

fn open(layout: &ConsoleLayout, policy: LockPolicy) -> Arc<ConfigStore> {
    let mut options = ConfigStoreOptions::new(layout.config_path(), layout.backup_dir());
    options.lock_policy = policy;
    ConfigStore::new(options)
}

fn publisher(name: &str, secret: &str) -> StreamingUser {
    StreamingUser {
        name: name.to_string(),
        secret: Secret::new(secret),
        label: None,
        permissions: vec![Permission::scoped(Action::Publish, name)],
        ips: Vec::new(),
    }
}

#[tokio::test]
async fn protocol_toggle_changes_one_line() -> TestResult<()> {
    let layout = ConsoleLayout::new()?;
    let store = open(&layout, LockPolicy::Block);

    store
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Srt,
            enabled: Some(true),
            port: None,
            encryption: None,
        }))
        .await?;

    assert_eq!(
        layout.config_text()?,
        SAMPLE_CONFIG.replace("\nsrt: no\n", "\nsrt: yes\n")
    );
    assert!(store.read().await?.protocol(Protocol::Srt)?.enabled);
    Ok(())
}

#[tokio::test]
async fn every_mutation_takes_exactly_one_backup() -> TestResult<()> {
    let layout = ConsoleLayout::new()?;
    let store = open(&layout, LockPolicy::Block);

    let first = store
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Rtmp,
            enabled: Some(false),
            port: None,
            encryption: None,
        }))
        .await?;
    let second = store.apply_raw(SAMPLE_CONFIG.to_string()).await?;
    let third = store.snapshot_backup().await?;

    let names = layout.backup_names()?;
    assert_eq!(names.len(), 3);
    assert_eq!(store.backups().read(&first.backup)?, SAMPLE_CONFIG.as_bytes());
    assert!(names.contains(&second.backup.to_string()));
    assert!(names.contains(&third.to_string()));
    assert_eq!(store.list_backups().await?[0].id, third);
    Ok(())
}

#[tokio::test]
async fn user_edits_leave_the_rest_of_the_document_alone() -> TestResult<()> {
    let layout = ConsoleLayout::new()?;
    let store = open(&layout, LockPolicy::Block);
    let registry = StreamingUserRegistry::new(Arc::clone(&store));

    registry.add(publisher("cam2", "0042")).await?;

    let text = layout.config_text()?;
    let head_len = SAMPLE_CONFIG
        .find("authInternalUsers:")
        .ok_or("sample has a user section")?;
    let tail_start = SAMPLE_CONFIG
        .find("###############################################\n# API")
        .ok_or("sample has an API section")?;
    assert!(text.starts_with(&SAMPLE_CONFIG[..head_len]));
    assert!(text.ends_with(&SAMPLE_CONFIG[tail_start..]));
    assert!(text.contains("# Drones\n"));

    let users = registry.enumerate().await?;
    assert_eq!(users.len(), 5);
    let cam2 = users.iter().find(|user| user.name == "cam2").ok_or("cam2 added")?;
    assert_eq!(cam2.secret.expose(), "0042");
    let cam1 = users.iter().find(|user| user.name == "cam1").ok_or("cam1 kept")?;
    assert_eq!(cam1.secret.expose(), "000123");
    assert_eq!(cam1.label.as_deref(), Some("Drones"));
    Ok(())
}

#[tokio::test]
async fn built_in_users_survive_delete_attempts() -> TestResult<()> {
    let layout = ConsoleLayout::new()?;
    let store = open(&layout, LockPolicy::Block);
    let registry = StreamingUserRegistry::new(Arc::clone(&store));

    for user in registry.enumerate().await? {
        if user.built_in().is_none() {
            continue;
        }
        let result = registry.delete(user.selector()).await;
        assert!(
            matches!(result, Err(ConfigError::ProtectedUser { .. })),
            "{:?} must be protected",
            user.built_in()
        );
    }
    assert_eq!(layout.config_text()?, SAMPLE_CONFIG);

    let built_ins: Vec<_> = registry
        .enumerate()
        .await?
        .iter()
        .filter_map(StreamingUser::built_in)
        .collect();
    assert_eq!(
        built_ins,
        vec![
            BuiltIn::LocalhostExemption,
            BuiltIn::TestStreamViewer,
            BuiltIn::HlsViewer
        ]
    );

    registry.delete(UserSelector::named("cam1")).await?;
    assert_eq!(registry.enumerate().await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn rejected_edits_do_not_touch_the_live_file() -> TestResult<()> {
    let layout = ConsoleLayout::new()?;
    let store = open(&layout, LockPolicy::Block);

    let raw = store.apply_raw("logLevel: [broken\n".to_string()).await;
    assert!(matches!(raw, Err(ConfigError::InvalidDocument { .. })));

    let collision = store
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Rtmp,
            enabled: None,
            port: Some(8554),
            encryption: None,
        }))
        .await;
    assert!(matches!(collision, Err(ConfigError::InvalidField { .. })));

    let duplicate = store
        .apply_structured(StructuredPatch::AddUser {
            user: publisher("cam1", "secret"),
        })
        .await;
    assert!(matches!(duplicate, Err(ConfigError::DuplicateUser { .. })));

    assert_eq!(layout.config_text()?, SAMPLE_CONFIG);
    assert!(layout.backup_names()?.is_empty());
    assert_eq!(store.revision(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mutations_serialise_under_block_policy() -> TestResult<()> {
    let layout = ConsoleLayout::new()?;
    let store = open(&layout, LockPolicy::Block);

    let mut tasks = Vec::new();
    for index in 0..8 {
        let registry = StreamingUserRegistry::new(Arc::clone(&store));
        tasks.push(tokio::spawn(async move {
            registry
                .add(publisher(&format!("cam-{index}"), "secret-value"))
                .await
        }));
    }

    let mut revisions = BTreeSet::new();
    for task in tasks {
        revisions.insert(task.await??.revision);
    }
    assert_eq!(revisions, (1..=8).collect::<BTreeSet<u64>>());
    assert_eq!(store.read().await?.users()?.len(), 12);
    assert_eq!(layout.backup_names()?.len(), 8);
    Ok(())
}

#[tokio::test]
async fn fail_fast_store_reports_busy_across_instances() -> TestResult<()> {
    let layout = ConsoleLayout::new()?;
    let holder = open(&layout, LockPolicy::Block);
    let contender = open(&layout, LockPolicy::FailFast);

    let txn = holder.begin().await?;
    let busy = contender.apply_raw(SAMPLE_CONFIG.to_string()).await;
    assert!(matches!(busy, Err(ConfigError::Busy { .. })));
    drop(txn);

    contender.apply_raw(SAMPLE_CONFIG.to_string()).await?;
    Ok(())
}

#[tokio::test]
async fn corrupt_live_document_blocks_structured_edits() -> TestResult<()> {
    let layout = ConsoleLayout::with_config("paths: [\n")?;
    let store = open(&layout, LockPolicy::Block);

    let result = store
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Hls,
            enabled: Some(false),
            port: None,
            encryption: None,
        }))
        .await;
    assert!(matches!(result, Err(ConfigError::CorruptConfig { .. })));
    assert_eq!(layout.config_text()?, "paths: [\n");

    store.apply_raw(SAMPLE_CONFIG.to_string()).await?;
    assert_eq!(store.read().await?.users()?.len(), 4);
    Ok(())
}
