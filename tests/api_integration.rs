//! Integration tests for the HTTP API.
//!
//! Each test runs the real server on a free port against its own
//! temporary database and drives it over HTTP, covering the
//! reconciliation endpoint, the worker callback lifecycle (including
//! signature checking and duplicate delivery), polling, quote
//! matching, and requeueing.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use tempfile::TempDir;
use uuid::Uuid;

use product_recon::config::Config;
use product_recon::db;
use product_recon::migrate;
use product_recon::models::{NewOffer, NewProduct, OfferType, ProductSource, ProductStatus};
use product_recon::server;
use product_recon::store::{CatalogStore, SqliteStore};

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_config(tmp: &TempDir, port: u16, callback_secret: Option<&str>) -> Config {
    let db_path = tmp.path().join("recon.db");
    let secret_line = callback_secret
        .map(|s| format!("callback_secret = \"{}\"\n", s))
        .unwrap_or_default();
    let config_content = format!(
        r#"[database]
path = "{}"

[server]
bind = "127.0.0.1:{}"

[worker]
{}"#,
        db_path.display(),
        port,
        secret_line
    );
    toml::from_str(&config_content).unwrap()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn spawn_api(cfg: &Config, port: u16) -> tokio::task::JoinHandle<()> {
    let cfg_clone = cfg.clone();
    let handle = tokio::spawn(async move {
        server::run_server(&cfg_clone).await.ok();
    });
    wait_for_server(port).await;
    handle
}

/// Seed one catalog product with an active offer.
async fn seed_catalog(cfg: &Config) {
    migrate::run_migrations(cfg).await.unwrap();
    let pool = db::connect(cfg).await.unwrap();
    let store = SqliteStore::new(pool.clone());

    let manufacturer = store.get_or_create_manufacturer("HP").await.unwrap();
    let (product, created) = store
        .get_or_create_product(NewProduct {
            manufacturer_id: manufacturer.id.clone(),
            part_number: "CF248A".to_string(),
            name: "HP 48A Black Toner Cartridge".to_string(),
            description: "Original HP 48A black toner for LaserJet Pro".to_string(),
            category: Some("Toner".to_string()),
            status: ProductStatus::Active,
            source: ProductSource::Manual,
            is_demo: false,
            is_placeholder: false,
        })
        .await
        .unwrap();
    assert!(created);
    store
        .create_offer(NewOffer {
            product_id: product.id.clone(),
            offer_type: OfferType::Catalog,
            vendor_name: "Acme Supply".to_string(),
            vendor_sku: None,
            selling_price: Decimal::new(54_99, 2),
            currency: "USD".to_string(),
            is_confirmed: true,
            source_quote_id: None,
        })
        .await
        .unwrap();
    pool.close().await;
}

/// Seed a two-line quote directly and return its id.
async fn seed_quote(cfg: &Config) -> String {
    let pool = db::connect(cfg).await.unwrap();
    let quote_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO quotes (id, vendor_name, status, created_at) VALUES (?, ?, 'received', ?)",
    )
    .bind(&quote_id)
    .bind("Contoso IT")
    .bind(Utc::now().to_rfc3339())
    .execute(&pool)
    .await
    .unwrap();

    for (line, description, part) in [
        (1i64, "HP 48A Black Toner Cartridge", Some("CF248A")),
        (2i64, "Unobtainium flux capacitor", Some("ZZZ-FLUX-999")),
    ] {
        sqlx::query(
            r#"
            INSERT INTO quote_items (id, quote_id, line_number, description, part_number,
                                     manufacturer_name, quantity, unit_price)
            VALUES (?, ?, ?, ?, ?, NULL, 1, '61.50')
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&quote_id)
        .bind(line)
        .bind(description)
        .bind(part)
        .execute(&pool)
        .await
        .unwrap();
    }
    pool.close().await;
    quote_id
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "product-recon");
    assert_eq!(body["status"], "ok");

    server_handle.abort();
}

#[tokio::test]
async fn test_reconcile_endpoint_matches_catalog() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    seed_catalog(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"part_number": "CF248A"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let first = &body["results"][0];
    assert_eq!(first["title"], "HP 48A Black Toner Cartridge");
    assert_eq!(first["group"], "internal");
    assert_eq!(first["confidence"], 1.0);
    assert_eq!(first["is_exact_match"], true);
    assert_eq!(first["method"], "exact_id");
    assert_eq!(first["price"], "54.99");

    server_handle.abort();
}

#[tokio::test]
async fn test_reconcile_unknown_part_leaves_pollable_task() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    seed_catalog(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"part_number": "ZZZ-FLUX-999"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let first = &body["results"][0];
    assert_eq!(first["group"], "pending_external");
    assert_eq!(first["link"]["state"], "pending");
    let correlation_id = first["link"]["correlation_id"].as_str().unwrap();

    let resp = client
        .get(format!(
            "http://127.0.0.1:{}/api/lookups/{}",
            port, correlation_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "processing");

    server_handle.abort();
}

#[tokio::test]
async fn test_poll_unknown_task_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!(
            "http://127.0.0.1:{}/api/lookups/nonexistent-task",
            port
        ))
        .send()
        .await
        .unwrap();
    // Unknown is a normal outcome, not an error
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "not_found");

    server_handle.abort();
}

#[tokio::test]
async fn test_affiliate_callback_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    seed_catalog(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();

    // A marketplace identifier leaves a pending link task behind
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"identifier": "B0EXAMPLE1"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let first = &body["results"][0];
    assert_eq!(first["title"], "Amazon Product B0EXAMPLE1");
    assert_eq!(first["link"]["state"], "pending");
    let correlation_id = first["link"]["correlation_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Worker answers
    let resp = client
        .post(format!(
            "http://127.0.0.1:{}/callbacks/affiliate/{}",
            port, correlation_id
        ))
        .json(&json!({"affiliateUrl": "https://amzn.to/test48a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // The result is delivered exactly once
    let poll_url = format!("http://127.0.0.1:{}/api/lookups/{}", port, correlation_id);
    let body: Value = client.get(&poll_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["status"], "success");
    assert_eq!(body["result"]["affiliate_url"], "https://amzn.to/test48a");

    let body: Value = client.get(&poll_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "not_found");

    // A later lookup of the same listing sees the resolved link
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"identifier": "B0EXAMPLE1"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["link"]["state"], "resolved");
    assert_eq!(
        body["results"][0]["link"]["affiliate_url"],
        "https://amzn.to/test48a"
    );

    server_handle.abort();
}

#[tokio::test]
async fn test_duplicate_affiliate_callback_tolerated() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    seed_catalog(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"identifier": "B0EXAMPLE2"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let correlation_id = body["results"][0]["link"]["correlation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let callback_url = format!(
        "http://127.0.0.1:{}/callbacks/affiliate/{}",
        port, correlation_id
    );
    let payload = json!({"affiliateUrl": "https://amzn.to/first"});

    let resp = client.post(&callback_url).json(&payload).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    // A retried delivery is answered from the recorded result
    let resp = client.post(&callback_url).json(&payload).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["affiliate_url"], "https://amzn.to/first");

    // Once the result has been polled away, the task is gone for good
    let poll_url = format!("http://127.0.0.1:{}/api/lookups/{}", port, correlation_id);
    let body: Value = client.get(&poll_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "completed");

    let resp = client.post(&callback_url).json(&payload).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    server_handle.abort();
}

#[tokio::test]
async fn test_callback_signature_checking() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let secret = "test-secret";
    let cfg = test_config(&tmp, port, Some(secret));
    seed_catalog(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"identifier": "B0EXAMPLE3"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let correlation_id = body["results"][0]["link"]["correlation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let callback_url = format!(
        "http://127.0.0.1:{}/callbacks/affiliate/{}",
        port, correlation_id
    );
    let payload = r#"{"affiliateUrl":"https://amzn.to/signed"}"#;

    // Unsigned
    let resp = client
        .post(&callback_url)
        .header("content-type", "application/json")
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Tampered body
    let resp = client
        .post(&callback_url)
        .header("content-type", "application/json")
        .header("X-Recon-Signature", sign(secret, b"something else"))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Properly signed
    let resp = client
        .post(&callback_url)
        .header("content-type", "application/json")
        .header("X-Recon-Signature", sign(secret, payload.as_bytes()))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    server_handle.abort();
}

#[tokio::test]
async fn test_search_callback_creates_product() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    seed_catalog(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"part_number": "ZZZ-FLUX-999"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let correlation_id = body["results"][0]["link"]["correlation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let resp = client
        .post(format!(
            "http://127.0.0.1:{}/callbacks/search/{}",
            port, correlation_id
        ))
        .json(&json!({
            "partNumber": "ZZZ-FLUX-999",
            "title": "OmniCorp Flux Capacitor 1.21GW",
            "asin": "B0FLUXCAP1",
            "manufacturer": "OmniCorp",
            "price": 199.99,
            "affiliateUrl": "https://amzn.to/flux"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["status"], "success");

    // The discovered listing is now a first-class catalog product
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"part_number": "ZZZ-FLUX-999"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let first = &body["results"][0];
    assert_eq!(first["group"], "internal");
    assert_eq!(first["title"], "OmniCorp Flux Capacitor 1.21GW");
    assert_eq!(first["is_amazon_product"], true);

    server_handle.abort();
}

#[tokio::test]
async fn test_match_quote_endpoint() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    seed_catalog(&cfg).await;
    let quote_id = seed_quote(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!(
            "http://127.0.0.1:{}/api/quotes/{}/match",
            port, quote_id
        ))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["quote_id"], quote_id.as_str());
    assert_eq!(body["total_items"], 2);
    assert_eq!(body["matched_items"], 1);

    // Demo mode covers the line the catalog cannot
    let resp = client
        .post(format!(
            "http://127.0.0.1:{}/api/quotes/{}/match",
            port, quote_id
        ))
        .json(&json!({"demo_mode": true}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["matched_items"], 2);
    assert_eq!(body["demo_products_created"], 1);

    server_handle.abort();
}

#[tokio::test]
async fn test_match_quote_endpoint_unknown_quote() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!(
            "http://127.0.0.1:{}/api/quotes/nonexistent/match",
            port
        ))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    server_handle.abort();
}

#[tokio::test]
async fn test_requeue_endpoint() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port, None);
    seed_catalog(&cfg).await;
    let server_handle = spawn_api(&cfg, port).await;

    let client = reqwest::Client::new();
    client
        .post(format!("http://127.0.0.1:{}/api/reconcile", port))
        .json(&json!({"identifier": "B0EXAMPLE4"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("http://127.0.0.1:{}/api/requeue", port))
        .json(&json!({"dry_run": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["scanned"], 1);
    assert_eq!(body["requeued"], 0);
    assert_eq!(body["dry_run"], true);

    server_handle.abort();
}
