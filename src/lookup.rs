//! External lookup lifecycle.
//!
//! A lookup is born when a task is handed to the worker, identified
//! by a fresh correlation id. Until the worker answers, a pending
//! record sits in the cache; the callback consumes it (a callback
//! with no pending record is refused), applies the result to the
//! catalog, and leaves a poll-once status record behind. Pending
//! records expire on their own, so a worker that never answers leaves
//! nothing but a requeue candidate.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::{LookupCache, SqliteCache};
use crate::config::{Config, LookupConfig};
use crate::db;
use crate::extract::{extract_part_number, ListingData};
use crate::models::{
    AffiliateLink, LookupOutcome, LookupStatus, LookupTask, NewOffer, NewProduct, OfferType,
    PendingLookup, ProductSource, ProductStatus, RequeueReport, TaskKind, WorkerCallback,
};
use crate::store::{CatalogStore, SqliteStore};
use crate::worker::{HttpWorkerClient, WorkerClient};

pub const NOTIFY_CHANNEL: &str = "affiliate_notifications";

const FALLBACK_MANUFACTURER: &str = "Amazon Marketplace";

/// A callback or poll named a task with no pending record, either
/// because the id is bogus or because the record already expired or
/// was consumed.
#[derive(Debug)]
pub struct UnknownTask(pub String);

impl std::fmt::Display for UnknownTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task not found: {}", self.0)
    }
}

impl std::error::Error for UnknownTask {}

fn pending_key(kind: TaskKind, correlation_id: &str) -> String {
    match kind {
        TaskKind::AffiliateLink => format!("pending_affiliate_task:{correlation_id}"),
        TaskKind::ProductSearch => format!("pending_search_task:{correlation_id}"),
    }
}

fn status_key(kind: TaskKind, correlation_id: &str) -> String {
    match kind {
        TaskKind::AffiliateLink => format!("affiliate_task_status:{correlation_id}"),
        TaskKind::ProductSearch => format!("search_task_status:{correlation_id}"),
    }
}

/// Single-flight marker so one listing never has two live tasks.
fn inflight_key(platform: &str, platform_id: &str) -> String {
    format!("pending_link:{platform}:{platform_id}")
}

/// Answer to a status poll.
#[derive(Debug)]
pub enum PollReply {
    Completed(LookupOutcome),
    Processing,
    Unknown,
}

pub struct LookupCoordinator<'a> {
    store: &'a dyn CatalogStore,
    cache: &'a dyn LookupCache,
    worker: &'a dyn WorkerClient,
    config: &'a LookupConfig,
}

impl<'a> LookupCoordinator<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        cache: &'a dyn LookupCache,
        worker: &'a dyn WorkerClient,
        config: &'a LookupConfig,
    ) -> Self {
        Self {
            store,
            cache,
            worker,
            config,
        }
    }

    // ============ Dispatch ============

    /// Make sure a resolution task is in flight for the link and
    /// return its correlation id. An id already in flight is reused,
    /// never doubled.
    pub async fn ensure_affiliate_lookup(&self, link: &AffiliateLink) -> Result<String> {
        let marker = inflight_key(&link.platform, &link.platform_id);
        if let Some(existing) = self.cache.get(&marker).await? {
            return Ok(existing);
        }
        let (correlation_id, _delivered) = self.start_affiliate_lookup(link).await?;
        Ok(correlation_id)
    }

    async fn start_affiliate_lookup(&self, link: &AffiliateLink) -> Result<(String, bool)> {
        let correlation_id = Uuid::new_v4().to_string();
        let payload = json!({
            "linkId": link.id,
            "platform": link.platform,
            "platformId": link.platform_id,
            "originalUrl": link.original_url,
            "productId": link.product_id,
        });

        let pending = PendingLookup {
            kind: TaskKind::AffiliateLink,
            payload: payload.clone(),
            created_at: Utc::now(),
        };
        self.cache
            .set(
                &pending_key(TaskKind::AffiliateLink, &correlation_id),
                &serde_json::to_string(&pending)?,
                self.config.pending_ttl_secs,
            )
            .await?;
        self.cache
            .set(
                &inflight_key(&link.platform, &link.platform_id),
                &correlation_id,
                self.config.pending_ttl_secs,
            )
            .await?;

        let task = LookupTask {
            kind: TaskKind::AffiliateLink,
            correlation_id: correlation_id.clone(),
            payload,
        };
        let delivered = self.worker.dispatch(&task).await;
        Ok((correlation_id, delivered))
    }

    /// Send a free-text product search to the worker.
    pub async fn dispatch_product_search(&self, query: &str, platform: &str) -> Result<String> {
        let correlation_id = Uuid::new_v4().to_string();
        let payload = json!({
            "query": query,
            "platform": platform,
        });

        let pending = PendingLookup {
            kind: TaskKind::ProductSearch,
            payload: payload.clone(),
            created_at: Utc::now(),
        };
        self.cache
            .set(
                &pending_key(TaskKind::ProductSearch, &correlation_id),
                &serde_json::to_string(&pending)?,
                self.config.pending_ttl_secs,
            )
            .await?;

        let task = LookupTask {
            kind: TaskKind::ProductSearch,
            correlation_id: correlation_id.clone(),
            payload,
        };
        self.worker.dispatch(&task).await;
        Ok(correlation_id)
    }

    // ============ Callbacks ============

    /// Apply a worker answer for an affiliate-link task. Consumes the
    /// pending record; a second callback with the same id is refused.
    pub async fn resolve_affiliate_callback(
        &self,
        correlation_id: &str,
        callback: &WorkerCallback,
    ) -> Result<LookupOutcome> {
        let pending = match self
            .consume_pending(TaskKind::AffiliateLink, correlation_id)
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                if let Some(outcome) = self
                    .replayed_outcome(TaskKind::AffiliateLink, correlation_id)
                    .await?
                {
                    return Ok(outcome);
                }
                return Err(err);
            }
        };

        if let (Some(platform), Some(platform_id)) = (
            pending.payload["platform"].as_str(),
            pending.payload["platformId"].as_str(),
        ) {
            self.cache.delete(&inflight_key(platform, platform_id)).await?;
        }
        let link_id = pending.payload["linkId"].as_str().map(str::to_string);
        let product_id = pending.payload["productId"].as_str().map(str::to_string);

        let outcome = match (&callback.error, &callback.affiliate_url) {
            (Some(error), _) => {
                tracing::warn!(correlation_id, error = %error, "affiliate lookup failed");
                if let Some(link_id) = &link_id {
                    self.store
                        .update_link_result(link_id, &format!("ERROR: {error}"), None)
                        .await?;
                }
                LookupOutcome {
                    status: LookupStatus::Error,
                    affiliate_url: None,
                    product_id,
                    message: Some(error.clone()),
                    completed_at: Utc::now(),
                }
            }
            (None, Some(affiliate_url)) => {
                if let Some(link_id) = &link_id {
                    self.store
                        .update_link_result(link_id, affiliate_url, None)
                        .await?;
                }
                LookupOutcome {
                    status: LookupStatus::Success,
                    affiliate_url: Some(affiliate_url.clone()),
                    product_id,
                    message: None,
                    completed_at: Utc::now(),
                }
            }
            (None, None) => {
                let message = "worker returned neither an affiliate URL nor an error";
                if let Some(link_id) = &link_id {
                    self.store
                        .update_link_result(link_id, &format!("ERROR: {message}"), None)
                        .await?;
                }
                LookupOutcome {
                    status: LookupStatus::Error,
                    affiliate_url: None,
                    product_id,
                    message: Some(message.to_string()),
                    completed_at: Utc::now(),
                }
            }
        };

        self.finish(TaskKind::AffiliateLink, correlation_id, &outcome)
            .await?;
        self.cache.publish(
            NOTIFY_CHANNEL,
            &json!({
                "type": "affiliate_resolved",
                "taskId": correlation_id,
                "status": outcome.status,
                "timestamp": outcome.completed_at.to_rfc3339(),
            })
            .to_string(),
        );
        Ok(outcome)
    }

    /// Apply a worker answer for a product-search task, materializing
    /// the found listing as catalog rows.
    pub async fn resolve_search_callback(
        &self,
        correlation_id: &str,
        callback: &WorkerCallback,
    ) -> Result<LookupOutcome> {
        let pending = match self
            .consume_pending(TaskKind::ProductSearch, correlation_id)
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                if let Some(outcome) = self
                    .replayed_outcome(TaskKind::ProductSearch, correlation_id)
                    .await?
                {
                    return Ok(outcome);
                }
                if let Some(part) = callback.part_number.as_deref().or(callback.asin.as_deref()) {
                    if let Some(product) = self.store.find_product_by_part_number(part).await? {
                        tracing::debug!(
                            correlation_id,
                            product = %product.id,
                            "duplicate search callback for an already recorded product"
                        );
                        return Ok(LookupOutcome {
                            status: LookupStatus::Success,
                            affiliate_url: None,
                            product_id: Some(product.id),
                            message: None,
                            completed_at: Utc::now(),
                        });
                    }
                }
                return Err(err);
            }
        };
        let platform = pending.payload["platform"].as_str().unwrap_or("amazon");

        if let Some(error) = &callback.error {
            tracing::warn!(correlation_id, error = %error, "product search failed");
            let outcome = LookupOutcome {
                status: LookupStatus::Error,
                affiliate_url: None,
                product_id: None,
                message: Some(error.clone()),
                completed_at: Utc::now(),
            };
            self.finish(TaskKind::ProductSearch, correlation_id, &outcome)
                .await?;
            return Ok(outcome);
        }

        let asin = callback.asin.as_deref().filter(|s| !s.is_empty());
        let part_number = match (callback.part_number.as_deref().filter(|s| !s.is_empty()), asin)
        {
            (Some(pn), _) => pn.to_string(),
            (None, Some(asin)) => {
                let listing = listing_from_callback(callback);
                extract_part_number(&listing, asin).value
            }
            (None, None) => {
                let outcome = LookupOutcome {
                    status: LookupStatus::Error,
                    affiliate_url: None,
                    product_id: None,
                    message: Some("worker response carries no listing identifiers".to_string()),
                    completed_at: Utc::now(),
                };
                self.finish(TaskKind::ProductSearch, correlation_id, &outcome)
                    .await?;
                return Ok(outcome);
            }
        };

        let manufacturer_name = callback
            .manufacturer
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_MANUFACTURER);
        let manufacturer = self.store.get_or_create_manufacturer(manufacturer_name).await?;

        let name = match (&callback.title, asin) {
            (Some(title), _) if !title.is_empty() => title.clone(),
            (_, Some(asin)) => format!("Amazon Product {asin}"),
            _ => part_number.clone(),
        };
        let (product, created) = self
            .store
            .get_or_create_product(NewProduct {
                manufacturer_id: manufacturer.id.clone(),
                part_number,
                name,
                description: callback.description.clone().unwrap_or_default(),
                category: callback.category.clone(),
                status: ProductStatus::Active,
                source: ProductSource::Amazon,
                is_demo: false,
                is_placeholder: false,
            })
            .await?;
        if created {
            tracing::info!(product_id = %product.id, "created product from marketplace listing");
        }

        if let Some(asin) = asin {
            let original_url = format!("https://www.amazon.com/dp/{asin}");
            let (link, _) = self.store.ensure_link(platform, asin, &original_url).await?;
            let affiliate_url = callback
                .affiliate_url
                .clone()
                .unwrap_or(link.affiliate_url.clone());
            self.store
                .update_link_result(&link.id, &affiliate_url, Some(&product.id))
                .await?;
        }

        if let Some(price) = callback.price {
            if let Ok(price) = rust_decimal::Decimal::try_from(price) {
                self.store
                    .create_offer(NewOffer {
                        product_id: product.id.clone(),
                        offer_type: OfferType::Affiliate,
                        vendor_name: "Amazon".to_string(),
                        vendor_sku: asin.map(str::to_string),
                        selling_price: price.round_dp(2),
                        currency: "USD".to_string(),
                        is_confirmed: true,
                        source_quote_id: None,
                    })
                    .await?;
            }
        }

        let outcome = LookupOutcome {
            status: LookupStatus::Success,
            affiliate_url: callback.affiliate_url.clone(),
            product_id: Some(product.id.clone()),
            message: None,
            completed_at: Utc::now(),
        };
        self.finish(TaskKind::ProductSearch, correlation_id, &outcome)
            .await?;
        self.cache.publish(
            NOTIFY_CHANNEL,
            &json!({
                "type": "product_created",
                "taskId": correlation_id,
                "asin": asin,
                "productId": product.id,
                "timestamp": outcome.completed_at.to_rfc3339(),
            })
            .to_string(),
        );
        Ok(outcome)
    }

    async fn consume_pending(
        &self,
        kind: TaskKind,
        correlation_id: &str,
    ) -> Result<PendingLookup> {
        let key = pending_key(kind, correlation_id);
        let raw = self
            .cache
            .get(&key)
            .await?
            .ok_or_else(|| anyhow::Error::new(UnknownTask(correlation_id.to_string())))?;
        self.cache.delete(&key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// A callback whose pending record is gone is an expired task or a
    /// duplicate delivery. Duplicates still have their result cached
    /// and are acknowledged from it without touching state.
    async fn replayed_outcome(
        &self,
        kind: TaskKind,
        correlation_id: &str,
    ) -> Result<Option<LookupOutcome>> {
        let Some(raw) = self.cache.get(&status_key(kind, correlation_id)).await? else {
            return Ok(None);
        };
        tracing::debug!(correlation_id, "duplicate worker callback tolerated");
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn finish(
        &self,
        kind: TaskKind,
        correlation_id: &str,
        outcome: &LookupOutcome,
    ) -> Result<()> {
        self.cache
            .set(
                &status_key(kind, correlation_id),
                &serde_json::to_string(outcome)?,
                self.config.result_ttl_secs,
            )
            .await
    }

    // ============ Poll and requeue ============

    /// Fetch the state of a task. A completed result is delivered
    /// exactly once; later polls see it as unknown. The pending check
    /// comes first so a task resolving mid-poll reads as processing,
    /// never as unknown.
    pub async fn poll(&self, correlation_id: &str) -> Result<PollReply> {
        for kind in [TaskKind::AffiliateLink, TaskKind::ProductSearch] {
            if self
                .cache
                .get(&pending_key(kind, correlation_id))
                .await?
                .is_some()
            {
                return Ok(PollReply::Processing);
            }
        }
        for kind in [TaskKind::AffiliateLink, TaskKind::ProductSearch] {
            let key = status_key(kind, correlation_id);
            if let Some(raw) = self.cache.get(&key).await? {
                self.cache.delete(&key).await?;
                return Ok(PollReply::Completed(serde_json::from_str(&raw)?));
            }
        }
        Ok(PollReply::Unknown)
    }

    /// Re-dispatch links whose resolution is missing or errored.
    pub async fn requeue(
        &self,
        platform: Option<&str>,
        limit: Option<i64>,
        dry_run: bool,
    ) -> Result<RequeueReport> {
        let candidates = self.store.list_requeue_candidates(platform, limit).await?;
        let scanned = candidates.len() as i64;
        if dry_run {
            return Ok(RequeueReport {
                scanned,
                requeued: 0,
                dry_run: true,
            });
        }

        let mut requeued = 0;
        for link in &candidates {
            // Drop the single-flight marker so the dispatch is fresh
            self.cache
                .delete(&inflight_key(&link.platform, &link.platform_id))
                .await?;
            let (correlation_id, delivered) = self.start_affiliate_lookup(link).await?;
            if delivered {
                requeued += 1;
                tracing::debug!(
                    link_id = %link.id,
                    correlation_id = %correlation_id,
                    "requeued affiliate lookup"
                );
            }
        }
        Ok(RequeueReport {
            scanned,
            requeued,
            dry_run: false,
        })
    }
}

// ============ CLI entry points ============

/// Poll a task id from the command line and print its state.
pub async fn run_poll(config: &Config, task_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let cache = SqliteCache::new(pool.clone());
    let worker = HttpWorkerClient::new(&config.worker, &config.server)?;
    let coordinator = LookupCoordinator::new(&store, &cache, &worker, &config.lookup);

    let reply = coordinator.poll(task_id).await?;
    pool.close().await;
    match reply {
        PollReply::Completed(outcome) => {
            println!("completed ({})", outcome.status.as_str());
            if let Some(url) = &outcome.affiliate_url {
                println!("  affiliate_url: {}", url);
            }
            if let Some(product_id) = &outcome.product_id {
                println!("  product: {}", product_id);
            }
            if let Some(message) = &outcome.message {
                println!("  message: {}", message);
            }
        }
        PollReply::Processing => println!("processing"),
        PollReply::Unknown => println!("not_found"),
    }
    Ok(())
}

/// Re-dispatch unresolved or errored links and print a short report.
pub async fn run_requeue(
    config: &Config,
    platform: Option<&str>,
    limit: Option<i64>,
    dry_run: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let cache = SqliteCache::new(pool.clone());
    let worker = HttpWorkerClient::new(&config.worker, &config.server)?;
    let coordinator = LookupCoordinator::new(&store, &cache, &worker, &config.lookup);

    let report = coordinator.requeue(platform, limit, dry_run).await?;
    pool.close().await;
    if report.dry_run {
        println!("requeue (dry run)");
        println!("  candidates: {}", report.scanned);
    } else {
        println!("requeue");
        println!("  candidates: {}", report.scanned);
        println!("  requeued:   {}", report.requeued);
    }
    println!("ok");
    Ok(())
}

fn listing_from_callback(callback: &WorkerCallback) -> ListingData {
    let mut technical_details = BTreeMap::new();
    if let Some(Value::Object(map)) = &callback.technical_details {
        for (key, value) in map {
            if let Some(s) = value.as_str() {
                technical_details.insert(key.clone(), s.to_string());
            }
        }
    }
    ListingData {
        title: callback.title.clone(),
        description: callback.description.clone(),
        technical_details,
    }
}
