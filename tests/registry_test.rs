use chrono::{Duration, Utc};
use na_be::registry::AccountRegistry;
use tempfile::TempDir;

#[tokio::test]
async fn test_register_list_remove() {
    let dir = TempDir::new().unwrap();
    let registry = AccountRegistry::load(dir.path()).unwrap();

    let account = registry
        .register("webassemblymusic-treasury.sputnik-dao.near", true, None)
        .await
        .unwrap();
    assert_eq!(account.account_id, "webassemblymusic-treasury.sputnik-dao.near");
    assert!(account.enabled);
    assert!(account.last_synced_at.is_none());

    registry.register("other.sputnik-dao.near", false, None).await.unwrap();

    let listed = registry.list().await;
    assert_eq!(listed.len(), 2);

    // Only enabled, unexpired accounts are eligible for the cycle
    let eligible = registry.eligible().await;
    assert_eq!(eligible.len(), 1);
    assert_eq!(
        eligible[0].account_id,
        "webassemblymusic-treasury.sputnik-dao.near"
    );

    assert!(registry.remove("other.sputnik-dao.near").await.unwrap());
    assert!(!registry.remove("other.sputnik-dao.near").await.unwrap());
    assert_eq!(registry.list().await.len(), 1);
}

#[tokio::test]
async fn test_registrations_survive_reload() {
    let dir = TempDir::new().unwrap();

    {
        let registry = AccountRegistry::load(dir.path()).unwrap();
        registry
            .register("treasury.sputnik-dao.near", true, None)
            .await
            .unwrap();
        registry.touch_synced("treasury.sputnik-dao.near").await.unwrap();
    }

    let reloaded = AccountRegistry::load(dir.path()).unwrap();
    let accounts = reloaded.list().await;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].account_id, "treasury.sputnik-dao.near");
    assert!(accounts[0].last_synced_at.is_some());
}

#[tokio::test]
async fn test_expired_registration_skipped_but_kept() {
    let dir = TempDir::new().unwrap();
    let registry = AccountRegistry::load(dir.path()).unwrap();

    registry
        .register(
            "expired.sputnik-dao.near",
            true,
            Some(Utc::now() - Duration::hours(1)),
        )
        .await
        .unwrap();
    registry
        .register(
            "active.sputnik-dao.near",
            true,
            Some(Utc::now() + Duration::hours(1)),
        )
        .await
        .unwrap();

    let eligible = registry.eligible().await;
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].account_id, "active.sputnik-dao.near");

    // The expired registration stays on file for later renewal
    assert_eq!(registry.list().await.len(), 2);

    // Renewal restores eligibility
    registry
        .register("expired.sputnik-dao.near", true, None)
        .await
        .unwrap();
    assert_eq!(registry.eligible().await.len(), 2);
}

#[tokio::test]
async fn test_eligible_orders_least_recently_synced_first() {
    let dir = TempDir::new().unwrap();
    let registry = AccountRegistry::load(dir.path()).unwrap();

    registry.register("a.sputnik-dao.near", true, None).await.unwrap();
    registry.register("b.sputnik-dao.near", true, None).await.unwrap();

    registry.touch_synced("a.sputnik-dao.near").await.unwrap();

    // Never-synced accounts come first, then the stalest
    let eligible = registry.eligible().await;
    assert_eq!(eligible[0].account_id, "b.sputnik-dao.near");
    assert_eq!(eligible[1].account_id, "a.sputnik-dao.near");
}
