//! `set_perms` is one transaction per call, but two concurrent callers on
//! the same (subject, object) pair race last-writer-wins: the losing call's
//! flag set is replaced wholesale, never merged. This test demonstrates that
//! the race exists rather than pretending it cannot happen.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use objperm::{db, Engine, ObjectRef, Registry, SqliteDirectory, SqliteGrantStore, Subject};

#[tokio::test]
async fn concurrent_set_perms_is_last_writer_wins_not_a_merge() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let pool = db::init(&format!("sqlite://{}", db_path.display())).await?;

    let store = Arc::new(SqliteGrantStore::new(pool.clone()));
    let registry = Arc::new(Registry::new(store.clone()));
    registry
        .register(["Perm1", "Perm2", "Perm3", "Perm4"], "TestModel")
        .await?;
    let directory = Arc::new(SqliteDirectory::new(pool));
    let engine = Engine::new(registry, store, directory);

    let user = Subject::User(Uuid::new_v4());
    let obj = ObjectRef::new("TestModel", Uuid::new_v4());

    let first: &[&str] = &["Perm1", "Perm2"];
    let second: &[&str] = &["Perm3", "Perm4"];

    let (a, b) = tokio::join!(
        engine.set_perms(&user, first, &obj),
        engine.set_perms(&user, second, &obj),
    );
    a?;
    b?;

    let result: HashSet<String> = engine.get_perms(&user, &obj).await?.into_iter().collect();
    let first_set: HashSet<String> = first.iter().map(|p| p.to_string()).collect();
    let second_set: HashSet<String> = second.iter().map(|p| p.to_string()).collect();

    // exactly one writer's set survives; the union would mean the replace
    // semantics silently degraded to per-flag merging
    assert!(
        result == first_set || result == second_set,
        "expected one whole flag set to win, got {result:?}"
    );
    Ok(())
}
