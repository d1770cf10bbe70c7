mod common;

use common::{TestServer, native_entry};
use na_be::handlers::balance_changes::ledger::AccountHistory;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.url("/api/health"))
        .send()
        .await
        .expect("Health check request failed");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dataDir"]["available"], true);
    assert_eq!(body["accounts"]["registered"], 0);
}

#[tokio::test]
async fn test_account_registration_crud() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    // Invalid NEAR account ids are rejected up front
    let response = client
        .post(server.url("/api/accounts"))
        .json(&serde_json::json!({ "accountId": "NOT a valid id!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Register
    let response = client
        .post(server.url("/api/accounts"))
        .json(&serde_json::json!({
            "accountId": "webassemblymusic-treasury.sputnik-dao.near"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let registered: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        registered["accountId"],
        "webassemblymusic-treasury.sputnik-dao.near"
    );
    assert_eq!(registered["enabled"], true);
    assert!(registered["createdAt"].is_string());

    // List
    let response = client.get(server.url("/api/accounts")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let accounts: serde_json::Value = response.json().await.unwrap();
    assert_eq!(accounts.as_array().unwrap().len(), 1);

    // Delete
    let response = client
        .delete(server.url("/api/accounts/webassemblymusic-treasury.sputnik-dao.near"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .delete(server.url("/api/accounts/webassemblymusic-treasury.sputnik-dao.near"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_history_endpoint() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    // Unregistered account with no ledger file
    let response = client
        .get(server.url("/api/accounts/unknown.near/history"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Registered but not yet synced: an empty ledger document
    client
        .post(server.url("/api/accounts"))
        .json(&serde_json::json!({ "accountId": "fresh.sputnik-dao.near" }))
        .send()
        .await
        .unwrap();

    let response = client
        .get(server.url("/api/accounts/fresh.sputnik-dao.near/history"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["accountId"], "fresh.sputnik-dao.near");
    assert_eq!(body["metadata"]["totalTransactions"], 0);
    assert_eq!(body["metadata"]["historyComplete"], false);

    // With a seeded ledger file, the document comes back verbatim
    let mut history = AccountHistory::new("seeded.sputnik-dao.near");
    server
        .state
        .store
        .insert(&mut history, native_entry(100, "0", "1000"));
    server
        .state
        .store
        .insert(&mut history, native_entry(200, "1000", "900"));
    server.state.store.save(&history).unwrap();

    let response = client
        .get(server.url("/api/accounts/seeded.sputnik-dao.near/history"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["metadata"]["totalTransactions"], 2);
    assert_eq!(body["metadata"]["firstBlock"], 100);
    assert_eq!(body["metadata"]["lastBlock"], 200);
    assert_eq!(body["metadata"]["historyComplete"], true);
    assert_eq!(body["transactions"][0]["balanceAfter"]["native"], "1000");
}
