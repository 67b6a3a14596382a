//! Reconciliation orchestrator.
//!
//! One entry point unifies every way a product can be asked about: a
//! marketplace identifier, a bare part number, a free-text name, or a
//! listing URL. Marketplace identifiers take the link-first path,
//! which guarantees an affiliate link row exists and a resolution
//! task is in flight before any catalog answer goes out. Everything
//! else runs the supplier waterfall: the internal match chain first,
//! then a conditional external search when coverage is thin, then
//! accessory suggestions keyed off the device category, with a
//! future-demand placeholder recorded in the background when the
//! catalog had nothing at all.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{LookupCache, SqliteCache};
use crate::config::Config;
use crate::db;
use crate::extract::{asin_from_url, is_asin};
use crate::lookup::LookupCoordinator;
use crate::matching::MatchEngine;
use crate::models::{
    LinkState, MatchCandidate, MatchMethod, MatchQuery, Product, ProductSource, QuoteMatchSummary,
    RankedResult, ResultGroup,
};
use crate::store::{CatalogStore, SqliteStore};
use crate::worker::{HttpWorkerClient, WorkerClient};

/// Device categories and the search-text fragments that select them.
/// First hit wins, checked in order.
const DEVICE_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "laptops",
        &["laptop", "notebook", "macbook", "thinkpad", "inspiron", "pavilion"],
    ),
    (
        "desktops",
        &["desktop computer", "gaming pc", "all-in-one", "imac", "optiplex"],
    ),
    (
        "monitors",
        &["monitor", "display", "4k monitor", "gaming monitor", "ultrawide"],
    ),
    (
        "smartphones",
        &["iphone", "samsung galaxy", "pixel", "smartphone", "android"],
    ),
    ("tablets", &["ipad", "surface pro", "tablet", "kindle fire"]),
    (
        "gaming_devices",
        &["gaming laptop", "gaming desktop", "gaming chair", "gaming headset"],
    ),
    (
        "audio_devices",
        &["headphones", "earbuds", "speakers", "soundbar", "airpods"],
    ),
    ("cameras", &["camera", "dslr", "mirrorless", "gopro", "webcam"]),
];

/// Accessory search terms per device category.
const ACCESSORY_TERMS: &[(&str, &[&str])] = &[
    (
        "laptops",
        &["laptop power", "laptop cable", "laptop adapter", "notebook power", "laptop charger"],
    ),
    (
        "desktops",
        &["pc power", "computer cable", "desktop power", "pc adapter"],
    ),
    (
        "monitors",
        &["monitor cable", "hdmi cable", "vga cable", "display cable", "monitor mount"],
    ),
    ("gaming_devices", &["gaming cable", "gaming power", "gaming adapter"]),
    ("smartphones", &["phone charger", "usb cable", "phone adapter"]),
    ("tablets", &["tablet charger", "tablet cable", "tablet adapter"]),
];

/// Terms for recognized device categories with no dedicated mapping.
const DEFAULT_ACCESSORY_TERMS: &[&str] = &["cable", "adapter", "power"];

/// Words that mark a product as an accessory rather than a device.
const ACCESSORY_MARKERS: &[&str] = &[
    "cable",
    "cord",
    "adapter",
    "charger",
    "power supply",
    "mount",
    "bracket",
    "stand",
    "case",
    "cover",
    "connector",
    "extension",
    "hub",
    "splitter",
];

const ACCESSORY_POOL_LIMIT: i64 = 6;
const ACCESSORY_CONFIDENCE: f64 = 0.6;
const SEARCH_PLACEHOLDER_CONFIDENCE: f64 = 0.8;

/// Inputs accepted by the reconciliation entry point. Exactly one is
/// honored per call, in field order: identifier, part number, name,
/// URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconcileRequest {
    pub identifier: Option<String>,
    pub part_number: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
}

pub struct Reconciler {
    store: Arc<dyn CatalogStore>,
    cache: Arc<dyn LookupCache>,
    worker: Arc<dyn WorkerClient>,
    config: Config,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        cache: Arc<dyn LookupCache>,
        worker: Arc<dyn WorkerClient>,
        config: Config,
    ) -> Self {
        Self {
            store,
            cache,
            worker,
            config,
        }
    }

    fn engine(&self) -> MatchEngine<'_> {
        MatchEngine::new(
            self.store.as_ref(),
            &self.config.matching,
            &self.config.demo,
        )
    }

    fn coordinator(&self) -> LookupCoordinator<'_> {
        LookupCoordinator::new(
            self.store.as_ref(),
            self.cache.as_ref(),
            self.worker.as_ref(),
            &self.config.lookup,
        )
    }

    /// Resolve one request into a ranked result list.
    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<Vec<RankedResult>> {
        if let Some(identifier) = trimmed(&request.identifier) {
            let upper = identifier.to_uppercase();
            if is_asin(&upper) {
                return self.marketplace_lookup(&upper, None).await;
            }
            debug!(identifier, "identifier is not a marketplace id, matching as part number");
            return self
                .waterfall(MatchQuery {
                    part_number: Some(identifier.to_string()),
                    description: trimmed(&request.name).unwrap_or_default().to_string(),
                    ..MatchQuery::default()
                })
                .await;
        }

        if let Some(part_number) = trimmed(&request.part_number) {
            return self
                .waterfall(MatchQuery {
                    part_number: Some(part_number.to_string()),
                    description: trimmed(&request.name).unwrap_or_default().to_string(),
                    ..MatchQuery::default()
                })
                .await;
        }

        if let Some(name) = trimmed(&request.name) {
            return self
                .waterfall(MatchQuery {
                    part_number: None,
                    description: name.to_string(),
                    ..MatchQuery::default()
                })
                .await;
        }

        if let Some(url) = trimmed(&request.url) {
            if let Some(asin) = asin_from_url(url) {
                return self.marketplace_lookup(&asin, Some(url)).await;
            }
            debug!(url, "no marketplace identifier embedded in url");
        }

        Ok(Vec::new())
    }

    // ============ Marketplace path ============

    /// Answer for a marketplace listing id. The link row is ensured
    /// and a resolution task started before the catalog is consulted,
    /// so the listing is monetizable no matter what we know about it.
    async fn marketplace_lookup(
        &self,
        asin: &str,
        original_url: Option<&str>,
    ) -> Result<Vec<RankedResult>> {
        let platform = self.config.worker.platform.clone();
        let url = original_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://www.amazon.com/dp/{asin}"));
        let (link, _) = self.store.ensure_link(&platform, asin, &url).await?;

        let link_state = if link.is_resolved() {
            LinkState::Resolved(link)
        } else {
            let correlation_id = self.coordinator().ensure_affiliate_lookup(&link).await?;
            LinkState::Pending { correlation_id }
        };

        let mut results = Vec::new();
        match self.store.find_product_by_part_number(asin).await? {
            Some(product) => {
                info!(asin, product = %product.name, "marketplace identifier resolved in catalog");
                let alternatives = self.supplier_alternatives(&product).await?;
                let price = self.store.best_active_price(&product.id).await?;
                results.push(RankedResult {
                    group: ResultGroup::Internal,
                    title: product.name.clone(),
                    part_number: Some(product.part_number.clone()),
                    manufacturer_name: Some(product.manufacturer_name.clone()),
                    confidence: 1.0,
                    is_exact_match: true,
                    method: Some(MatchMethod::ExactId),
                    is_amazon_product: true,
                    is_demo_price: false,
                    price,
                    link: link_state,
                    product: Some(product),
                });
                results.extend(alternatives);
            }
            None => {
                debug!(asin, "marketplace identifier unknown to catalog, returning placeholder");
                results.push(listing_placeholder(asin, link_state));
            }
        }
        Ok(results)
    }

    /// Catalog products that could stand in for a marketplace listing
    /// we already know. Runs the internal chain only, never an
    /// external dispatch.
    async fn supplier_alternatives(&self, primary: &Product) -> Result<Vec<RankedResult>> {
        let query = MatchQuery {
            part_number: None,
            description: primary.name.clone(),
            ..MatchQuery::default()
        };
        let outcome = self.engine().find_matches(&query, false).await?;

        let mut results = Vec::new();
        for candidate in outcome.candidates {
            if candidate.product.id == primary.id {
                continue;
            }
            results.push(self.ranked_internal(candidate).await?);
        }
        Ok(results)
    }

    // ============ Supplier waterfall ============

    async fn waterfall(&self, query: MatchQuery) -> Result<Vec<RankedResult>> {
        let outcome = self.engine().find_matches(&query, false).await?;
        let internal = outcome.candidates;
        let total = internal.len();

        let search_text = if query.description.trim().is_empty() {
            query.part_number.clone().unwrap_or_default()
        } else {
            query.description.clone()
        };

        let mut monetizable = 0usize;
        for candidate in &internal {
            if self
                .store
                .product_has_resolved_link(&candidate.product.id)
                .await?
            {
                monetizable += 1;
            }
        }

        let internal_ids: Vec<String> = internal.iter().map(|c| c.product.id.clone()).collect();
        let mut results = Vec::with_capacity(total + 2);
        for candidate in internal {
            results.push(self.ranked_internal(candidate).await?);
        }

        let skip_external = monetizable >= self.config.matching.skip_external_min_monetizable
            || total >= self.config.matching.skip_external_min_total;
        if skip_external {
            debug!(total, monetizable, "internal coverage sufficient, skipping external search");
        } else if !search_text.is_empty() {
            match self
                .coordinator()
                .dispatch_product_search(&search_text, &self.config.worker.platform)
                .await
            {
                Ok(correlation_id) => {
                    results.push(search_placeholder(&search_text, correlation_id));
                }
                Err(error) => {
                    warn!(error = %error, "external search dispatch failed, serving internal results only");
                }
            }
        }

        results.extend(self.accessory_results(&search_text, &internal_ids).await?);

        if total == 0 && !search_text.is_empty() {
            self.spawn_future_demand(search_text.clone(), query.part_number.clone());
        }

        Ok(results)
    }

    /// Cross-sell suggestions for the recognized device category.
    /// Queries with no category yield nothing.
    async fn accessory_results(
        &self,
        search_text: &str,
        exclude: &[String],
    ) -> Result<Vec<RankedResult>> {
        let Some(terms) = accessory_terms(search_text) else {
            return Ok(Vec::new());
        };

        let keywords: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        let pool = self
            .store
            .find_products_by_keywords(&keywords, ACCESSORY_POOL_LIMIT)
            .await?;

        let mut seen: Vec<String> = exclude.to_vec();
        let mut results = Vec::new();
        for product in pool {
            if seen.iter().any(|id| *id == product.id) {
                continue;
            }
            if product.source != ProductSource::Manual || !looks_like_accessory(&product) {
                continue;
            }
            seen.push(product.id.clone());
            let price = self.store.best_active_price(&product.id).await?;
            results.push(RankedResult {
                group: ResultGroup::Accessory,
                title: product.name.clone(),
                part_number: Some(product.part_number.clone()),
                manufacturer_name: Some(product.manufacturer_name.clone()),
                confidence: ACCESSORY_CONFIDENCE,
                is_exact_match: false,
                method: None,
                is_amazon_product: false,
                is_demo_price: false,
                price,
                link: LinkState::Unknown,
                product: Some(product),
            });
        }
        Ok(results)
    }

    /// Record unmet demand without holding up the response.
    fn spawn_future_demand(&self, description: String, part_number: Option<String>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(error) = store
                .record_future_demand(&description, part_number.as_deref())
                .await
            {
                warn!(error = %error, "future demand bookkeeping failed");
            }
        });
    }

    async fn ranked_internal(&self, candidate: MatchCandidate) -> Result<RankedResult> {
        let price = if candidate.is_demo_price {
            candidate
                .details
                .get("demo_price")
                .and_then(Value::as_str)
                .and_then(|raw| Decimal::from_str(raw).ok())
        } else {
            self.store.best_active_price(&candidate.product.id).await?
        };
        Ok(RankedResult {
            group: ResultGroup::Internal,
            title: candidate.product.name.clone(),
            part_number: Some(candidate.product.part_number.clone()),
            manufacturer_name: Some(candidate.product.manufacturer_name.clone()),
            confidence: candidate.confidence,
            is_exact_match: candidate.is_exact,
            method: Some(candidate.method),
            is_amazon_product: candidate.product.source == ProductSource::Amazon,
            is_demo_price: candidate.is_demo_price,
            price,
            link: LinkState::Unknown,
            product: Some(candidate.product),
        })
    }

    // ============ Quote matching ============

    /// Re-run the match chain for every line of a quote, persist the
    /// results, and mirror matched pricing into quote offers. Returns
    /// None when the quote does not exist.
    pub async fn match_quote(
        &self,
        quote_id: &str,
        demo_mode: bool,
    ) -> Result<Option<QuoteMatchSummary>> {
        let Some(quote) = self.store.get_quote(quote_id).await? else {
            return Ok(None);
        };
        let items = self.store.list_quote_items(quote_id).await?;
        let engine = self.engine();

        let mut matched_items = 0i64;
        let mut demo_products_created = 0i64;
        let mut offers_created = 0i64;
        for item in &items {
            let query = MatchQuery {
                part_number: item.part_number.clone(),
                description: item.description.clone(),
                manufacturer_hint: item.manufacturer_name.clone(),
                unit_price: item.unit_price,
            };
            self.store.delete_matches(&item.id).await?;
            let outcome = engine.find_matches(&query, demo_mode).await?;
            if outcome.demo_created {
                demo_products_created += 1;
            }
            if outcome.candidates.is_empty() {
                debug!(line = item.line_number, "no match for quote line");
                continue;
            }
            self.store.insert_matches(&item.id, &outcome.candidates).await?;
            matched_items += 1;
            for candidate in &outcome.candidates {
                if self
                    .store
                    .upsert_quote_offer(&candidate.product.id, &quote, item)
                    .await?
                {
                    offers_created += 1;
                }
            }
        }

        info!(
            quote = quote_id,
            total = items.len(),
            matched = matched_items,
            offers = offers_created,
            "quote matching finished"
        );
        Ok(Some(QuoteMatchSummary {
            quote_id: quote_id.to_string(),
            total_items: items.len() as i64,
            matched_items,
            demo_products_created,
        }))
    }
}

// ============ CLI entry points ============

/// Resolve one request from the command line and print the ranked
/// results in tiers.
pub async fn run_reconcile(config: &Config, request: ReconcileRequest) -> Result<()> {
    let pool = db::connect(config).await?;
    let worker = HttpWorkerClient::new(&config.worker, &config.server)?;
    let reconciler = Reconciler::new(
        Arc::new(SqliteStore::new(pool.clone())),
        Arc::new(SqliteCache::new(pool.clone())),
        Arc::new(worker),
        config.clone(),
    );

    let results = reconciler.reconcile(&request).await?;
    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} ({})",
            i + 1,
            result.confidence,
            result.title,
            result.group.as_str()
        );
        if let Some(part) = &result.part_number {
            println!("    part: {}", part);
        }
        if let Some(manufacturer) = &result.manufacturer_name {
            println!("    manufacturer: {}", manufacturer);
        }
        if let Some(method) = result.method {
            println!("    method: {}", method.as_str());
        }
        if let Some(price) = result.price {
            println!("    price: {}", price);
        }
        match &result.link {
            LinkState::Resolved(link) => println!("    link: {}", link.affiliate_url),
            LinkState::Pending { correlation_id } => println!("    task: {}", correlation_id),
            LinkState::Unknown => {}
        }
        println!();
    }

    pool.close().await;
    Ok(())
}

/// Match every line of a stored quote and print the summary.
pub async fn run_match_quote(config: &Config, quote_id: &str, demo_mode: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let worker = HttpWorkerClient::new(&config.worker, &config.server)?;
    let reconciler = Reconciler::new(
        Arc::new(SqliteStore::new(pool.clone())),
        Arc::new(SqliteCache::new(pool.clone())),
        Arc::new(worker),
        config.clone(),
    );

    let summary = reconciler.match_quote(quote_id, demo_mode).await?;
    pool.close().await;
    let Some(summary) = summary else {
        bail!("quote not found: {}", quote_id);
    };

    println!("quote {}", summary.quote_id);
    println!("  items:   {}", summary.total_items);
    println!("  matched: {}", summary.matched_items);
    if demo_mode {
        println!("  demo products created: {}", summary.demo_products_created);
    }
    println!("ok");
    Ok(())
}

// ============ Placeholders and category tables ============

fn listing_placeholder(asin: &str, link: LinkState) -> RankedResult {
    RankedResult {
        group: ResultGroup::PendingExternal,
        title: format!("Amazon Product {asin}"),
        part_number: Some(asin.to_string()),
        manufacturer_name: None,
        product: None,
        confidence: 1.0,
        is_exact_match: true,
        method: None,
        is_amazon_product: true,
        is_demo_price: false,
        price: None,
        link,
    }
}

fn search_placeholder(search_text: &str, correlation_id: String) -> RankedResult {
    RankedResult {
        group: ResultGroup::PendingExternal,
        title: format!("Amazon Product - {search_text}"),
        part_number: None,
        manufacturer_name: None,
        product: None,
        confidence: SEARCH_PLACEHOLDER_CONFIDENCE,
        is_exact_match: false,
        method: None,
        is_amazon_product: true,
        is_demo_price: false,
        price: None,
        link: LinkState::Pending { correlation_id },
    }
}

fn device_category(search_text: &str) -> Option<&'static str> {
    let lower = search_text.to_lowercase();
    DEVICE_CATEGORIES
        .iter()
        .find(|(_, triggers)| triggers.iter().any(|t| lower.contains(t)))
        .map(|(category, _)| *category)
}

fn accessory_terms(search_text: &str) -> Option<&'static [&'static str]> {
    let category = device_category(search_text)?;
    Some(
        ACCESSORY_TERMS
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, terms)| *terms)
            .unwrap_or(DEFAULT_ACCESSORY_TERMS),
    )
}

fn looks_like_accessory(product: &Product) -> bool {
    let name = product.name.to_lowercase();
    let description = product.description.to_lowercase();
    ACCESSORY_MARKERS
        .iter()
        .any(|marker| name.contains(marker) || description.contains(marker))
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::MemoryCache;
    use crate::models::TaskKind;
    use crate::store::testing::MemoryStore;
    use crate::worker::testing::RecordingWorker;

    fn reconciler(
        store: &Arc<MemoryStore>,
        cache: &Arc<MemoryCache>,
        worker: &Arc<RecordingWorker>,
    ) -> Reconciler {
        Reconciler::new(
            store.clone(),
            cache.clone(),
            worker.clone(),
            Config::default(),
        )
    }

    fn fixtures() -> (Arc<MemoryStore>, Arc<MemoryCache>, Arc<RecordingWorker>) {
        (
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(RecordingWorker::accepting()),
        )
    }

    fn identifier_request(identifier: &str) -> ReconcileRequest {
        ReconcileRequest {
            identifier: Some(identifier.to_string()),
            ..ReconcileRequest::default()
        }
    }

    #[test]
    fn test_device_category_detection() {
        assert_eq!(device_category("ThinkPad X1 laptop"), Some("laptops"));
        assert_eq!(device_category("4k gaming monitor"), Some("monitors"));
        assert_eq!(device_category("KTD-PE432 memory module"), None);
        assert_eq!(accessory_terms("gopro mount"), Some(DEFAULT_ACCESSORY_TERMS));
        assert!(accessory_terms("KTD-PE432 memory module").is_none());
    }

    #[tokio::test]
    async fn test_marketplace_identifier_with_known_product() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Kingston");
        let product = store.add_product(&m, "B08738D39L", "Kingston 16GB Module", "ddr4 memory");
        store.add_offer(&product, "34.99");
        store.add_resolved_link(&product, "B08738D39L");

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&identifier_request("B08738D39L"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let primary = &results[0];
        assert_eq!(primary.group, ResultGroup::Internal);
        assert!(primary.is_exact_match);
        assert_eq!(primary.confidence, 1.0);
        assert_eq!(primary.price, Some(Decimal::from_str("34.99").unwrap()));
        assert!(matches!(primary.link, LinkState::Resolved(_)));
        assert!(worker.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_marketplace_identifier_unknown_returns_pending_placeholder() {
        let (store, cache, worker) = fixtures();

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&identifier_request("B08738D39L"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        let placeholder = &results[0];
        assert_eq!(placeholder.group, ResultGroup::PendingExternal);
        assert_eq!(placeholder.title, "Amazon Product B08738D39L");
        assert_eq!(placeholder.confidence, 1.0);
        assert!(placeholder.is_exact_match);
        assert!(placeholder.is_amazon_product);
        assert!(placeholder.product.is_none());
        assert!(matches!(placeholder.link, LinkState::Pending { .. }));

        assert_eq!(store.link_count(), 1);
        let tasks = worker.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::AffiliateLink);
    }

    #[tokio::test]
    async fn test_repeated_marketplace_lookup_dispatches_once() {
        let (store, cache, worker) = fixtures();
        let engine = reconciler(&store, &cache, &worker);

        engine.reconcile(&identifier_request("B08738D39L")).await.unwrap();
        engine.reconcile(&identifier_request("B08738D39L")).await.unwrap();

        assert_eq!(store.link_count(), 1);
        assert_eq!(worker.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_url_input_is_parsed_for_marketplace_id() {
        let (store, cache, worker) = fixtures();
        let url = "https://www.amazon.com/dp/B001ABCDEF?th=1";

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                url: Some(url.to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].part_number.as_deref(), Some("B001ABCDEF"));
        assert_eq!(store.link_count(), 1);
        assert_eq!(worker.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_non_marketplace_identifier_runs_the_waterfall() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Kingston");
        store.add_product(&m, "KTD-PE432/16G", "Kingston 16GB Module", "ddr4 server memory");

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&identifier_request("ktd-pe432/16g"))
            .await
            .unwrap();

        assert_eq!(results[0].group, ResultGroup::Internal);
        assert!(results[0].is_exact_match);
        assert_eq!(store.link_count(), 0);
    }

    #[tokio::test]
    async fn test_rich_internal_coverage_skips_external_search() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Kingston");
        for i in 0..5 {
            store.add_product(
                &m,
                "KTD-PE432",
                &format!("Kingston Module Rev {i}"),
                "ddr4 memory",
            );
        }

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                part_number: Some("KTD-PE432".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.group == ResultGroup::Internal));
        assert!(worker.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_monetizable_coverage_skips_external_search() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Kingston");
        let a = store.add_product(&m, "KTD-PE432", "Kingston Module A", "ddr4 memory");
        let b = store.add_product(&m, "KTD-PE432", "Kingston Module B", "ddr4 memory");
        store.add_resolved_link(&a, "B00000000A");
        store.add_resolved_link(&b, "B00000000B");

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                part_number: Some("KTD-PE432".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(worker.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_thin_coverage_dispatches_search_with_placeholder() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Kingston");
        store.add_product(&m, "KTD-PE432", "Kingston Module", "ddr4 memory");

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                part_number: Some("KTD-PE432".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        let tasks = worker.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::ProductSearch);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].group, ResultGroup::Internal);
        let placeholder = &results[1];
        assert_eq!(placeholder.group, ResultGroup::PendingExternal);
        assert_eq!(placeholder.title, "Amazon Product - KTD-PE432");
        assert_eq!(placeholder.confidence, SEARCH_PLACEHOLDER_CONFIDENCE);
        match &placeholder.link {
            LinkState::Pending { correlation_id } => {
                assert_eq!(correlation_id, &tasks[0].correlation_id);
            }
            other => panic!("expected pending link, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_query_records_future_demand() {
        let (store, cache, worker) = fixtures();

        reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                part_number: Some("ZZZ-FLUX-999".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        let mut recorded = 0;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            recorded = store.demand_count("ZZZ-FLUX-999");
            if recorded > 0 {
                break;
            }
        }
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn test_matched_query_skips_future_demand() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Kingston");
        store.add_product(&m, "KTD-PE432", "Kingston Module", "ddr4 memory");

        reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                part_number: Some("KTD-PE432".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.demand_count("KTD-PE432"), 0);
    }

    #[tokio::test]
    async fn test_accessories_follow_the_device_category() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Acme");
        store.add_product(
            &m,
            "CHG-65W",
            "USB-C Laptop Charger 65W",
            "65 watt laptop power adapter for notebooks",
        );
        store.add_product(&m, "TP-X1", "ThinkPad X1 Carbon", "business ultrabook");

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                name: Some("thinkpad x1 laptop".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        let accessories: Vec<_> = results
            .iter()
            .filter(|r| r.group == ResultGroup::Accessory)
            .collect();
        assert_eq!(accessories.len(), 1);
        assert_eq!(accessories[0].title, "USB-C Laptop Charger 65W");
        assert_eq!(accessories[0].confidence, ACCESSORY_CONFIDENCE);
        assert!(!accessories[0].is_exact_match);
    }

    #[tokio::test]
    async fn test_no_accessories_without_device_category() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Acme");
        store.add_product(&m, "HDMI-2M", "HDMI Cable 2m", "high speed hdmi cable");

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                part_number: Some("KTD-PE432".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.group != ResultGroup::Accessory));
    }

    #[tokio::test]
    async fn test_result_groups_keep_their_order() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Lenovo");
        store.add_product(&m, "20U9005MUS", "ThinkPad X1 Carbon Gen 8", "business laptop");
        store.add_product(
            &m,
            "4X20M26268",
            "Lenovo 65W Laptop Charger",
            "usb-c laptop power adapter",
        );

        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest {
                part_number: Some("20U9005MUS".to_string()),
                name: Some("thinkpad laptop".to_string()),
                ..ReconcileRequest::default()
            })
            .await
            .unwrap();

        let groups: Vec<ResultGroup> = results.iter().map(|r| r.group).collect();
        let internal_last = groups.iter().rposition(|g| *g == ResultGroup::Internal);
        let pending_first = groups.iter().position(|g| *g == ResultGroup::PendingExternal);
        let accessory_first = groups.iter().position(|g| *g == ResultGroup::Accessory);
        assert!(internal_last.is_some());
        assert!(pending_first.is_some());
        assert!(accessory_first.is_some());
        assert!(internal_last < pending_first);
        assert!(pending_first < accessory_first);
    }

    #[tokio::test]
    async fn test_match_quote_persists_matches_and_offers() {
        let (store, cache, worker) = fixtures();
        let m = store.add_manufacturer("Kingston");
        store.add_product(&m, "KTD-PE432", "Kingston 16GB Module", "ddr4 server memory");
        let quote = store.add_quote(Some("Acme Supply"));
        let hit = store.add_quote_item(
            &quote,
            1,
            "16GB DDR4 server memory",
            Some("KTD-PE432"),
            Some("Kingston"),
            Some("100.00"),
        );
        let miss = store.add_quote_item(&quote, 2, "xq", None, None, None);

        let summary = reconciler(&store, &cache, &worker)
            .match_quote(&quote.id, false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.matched_items, 1);
        assert_eq!(summary.demo_products_created, 0);
        assert!(store.match_count(&hit.id) >= 1);
        assert_eq!(store.match_count(&miss.id), 0);
        assert_eq!(store.offer_count(), 1);
    }

    #[tokio::test]
    async fn test_match_quote_demo_mode_counts_synthesized_products() {
        let (store, cache, worker) = fixtures();
        let quote = store.add_quote(None);
        let item = store.add_quote_item(
            &quote,
            1,
            "custom flux capacitor module",
            None,
            None,
            Some("50.00"),
        );

        let summary = reconciler(&store, &cache, &worker)
            .match_quote(&quote.id, true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.matched_items, 1);
        assert_eq!(summary.demo_products_created, 1);
        assert_eq!(store.match_count(&item.id), 1);
        assert_eq!(store.offer_count(), 1);
    }

    #[tokio::test]
    async fn test_match_quote_unknown_quote_is_none() {
        let (store, cache, worker) = fixtures();
        let summary = reconciler(&store, &cache, &worker)
            .match_quote("missing", false)
            .await
            .unwrap();
        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn test_empty_request_yields_no_results() {
        let (store, cache, worker) = fixtures();
        let results = reconciler(&store, &cache, &worker)
            .reconcile(&ReconcileRequest::default())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(worker.tasks().is_empty());
    }
}
