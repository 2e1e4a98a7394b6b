use std::sync::Arc;

use anyhow::{Context, Result};
use tempfile::TempDir;
use uuid::Uuid;

use objperm::{db, Engine, ObjectRef, PermError, Registry, SqliteDirectory, SqliteGrantStore, Subject};

async fn setup() -> Result<(TempDir, Engine)> {
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
    Ok((dir, engine))
}

fn instance() -> ObjectRef {
    ObjectRef::new("TestModel", Uuid::new_v4())
}

#[tokio::test]
async fn grant_then_get_perms_contains_each_permission() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let obj = instance();

    for perm in ["Perm1", "Perm2", "Perm3", "Perm4"] {
        engine.grant(&user, perm, &obj).await?;
        let perms = engine.get_perms(&user, &obj).await?;
        assert!(perms.iter().any(|p| p == perm), "missing {perm}");
    }
    Ok(())
}

#[tokio::test]
async fn grant_is_idempotent() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let obj = instance();

    engine.grant(&user, "Perm2", &obj).await?;
    engine.grant(&user, "Perm2", &obj).await?;

    assert_eq!(engine.get_perms(&user, &obj).await?, vec!["Perm2"]);
    Ok(())
}

#[tokio::test]
async fn revoke_removes_the_grant_and_is_idempotent() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let obj = instance();

    engine.grant(&user, "Perm1", &obj).await?;
    engine.revoke(&user, "Perm1", &obj).await?;
    assert!(engine.get_perms(&user, &obj).await?.is_empty());

    // revoking an ungranted permission is success, not an error
    engine.revoke(&user, "Perm1", &obj).await?;
    engine.revoke(&user, "Perm3", &obj).await?;
    Ok(())
}

#[tokio::test]
async fn set_perms_replaces_the_flag_set_exactly() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let obj = instance();

    engine.grant(&user, "Perm2", &obj).await?;
    engine.grant(&user, "Perm4", &obj).await?;

    let returned = engine.set_perms(&user, &["Perm1", "Perm3"], &obj).await?;
    assert_eq!(returned, vec!["Perm1", "Perm3"]);
    assert_eq!(engine.get_perms(&user, &obj).await?, vec!["Perm1", "Perm3"]);

    // works on a pair with no prior record too
    let other = instance();
    engine.set_perms(&user, &["Perm4"], &other).await?;
    assert_eq!(engine.get_perms(&user, &other).await?, vec!["Perm4"]);

    // empty set clears everything
    engine.set_perms(&user, &[], &obj).await?;
    assert!(engine.get_perms(&user, &obj).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn get_perms_is_empty_when_no_record_exists() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    assert!(engine.get_perms(&user, &instance()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn get_perms_follows_schema_order() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let obj = instance();

    engine.grant(&user, "Perm4", &obj).await?;
    engine.grant(&user, "Perm1", &obj).await?;
    engine.grant(&user, "Perm3", &obj).await?;

    assert_eq!(
        engine.get_perms(&user, &obj).await?,
        vec!["Perm1", "Perm3", "Perm4"]
    );
    Ok(())
}

#[tokio::test]
async fn has_perm_checks_one_flag_and_denies_on_missing_object() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let group = Subject::Group(Uuid::new_v4());
    let obj = instance();

    engine.grant(&user, "Perm1", &obj).await?;
    assert!(engine.has_perm(&user, "Perm1", Some(&obj)).await?);
    assert!(!engine.has_perm(&user, "Perm2", Some(&obj)).await?);

    // a missing object denies rather than raises, for groups and users alike
    assert!(!engine.has_perm(&group, "Perm1", None).await?);
    assert!(!engine.has_perm(&user, "Perm1", None).await?);
    Ok(())
}

#[tokio::test]
async fn unknown_permission_is_rejected_on_write_paths() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let obj = instance();

    let err = engine.grant(&user, "Perm9", &obj).await.unwrap_err();
    assert!(matches!(err, PermError::UnknownPermission { .. }), "{err}");

    let err = engine
        .set_perms(&user, &["Perm1", "Perm9"], &obj)
        .await
        .unwrap_err();
    assert!(matches!(err, PermError::UnknownPermission { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn unregistered_type_fails_every_operation() -> Result<()> {
    let (_dir, engine) = setup().await?;
    let user = Subject::User(Uuid::new_v4());
    let obj = ObjectRef::new("NeverRegistered", Uuid::new_v4());

    let err = engine.grant(&user, "Perm1", &obj).await.unwrap_err();
    assert!(matches!(err, PermError::UnregisteredType(_)), "{err}");

    let err = engine.get_perms(&user, &obj).await.unwrap_err();
    assert!(matches!(err, PermError::UnregisteredType(_)), "{err}");

    let err = engine
        .perms_on_any(&user, "NeverRegistered", &["Perm1"], true)
        .await
        .unwrap_err();
    assert!(matches!(err, PermError::UnregisteredType(_)), "{err}");
    Ok(())
}
