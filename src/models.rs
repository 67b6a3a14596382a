//! Core data models used throughout the reconciliation engine.
//!
//! These types represent the catalog entities, match candidates, and
//! lookup lifecycle records that flow through the matching pipeline
//! and the external-lookup state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A product manufacturer, unique by name.
#[derive(Debug, Clone, Serialize)]
pub struct Manufacturer {
    pub id: String,
    pub name: String,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog product, unique by `(manufacturer_id, part_number)`.
#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: String,
    pub manufacturer_id: String,
    pub manufacturer_name: String,
    pub part_number: String,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub status: ProductStatus,
    pub source: ProductSource,
    pub is_demo: bool,
    pub is_placeholder: bool,
    pub future_demand_count: i64,
    pub last_demand_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inactive" => ProductStatus::Inactive,
            _ => ProductStatus::Active,
        }
    }
}

/// Where a product row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductSource {
    Manual,
    Amazon,
    Demo,
    Future,
}

impl ProductSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductSource::Manual => "manual",
            ProductSource::Amazon => "amazon",
            ProductSource::Demo => "demo",
            ProductSource::Future => "future",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "amazon" => ProductSource::Amazon,
            "demo" => ProductSource::Demo,
            "future" => ProductSource::Future,
            _ => ProductSource::Manual,
        }
    }
}

/// A vendor price for a product.
#[derive(Debug, Clone, Serialize)]
pub struct Offer {
    pub id: String,
    pub product_id: String,
    pub offer_type: OfferType,
    pub vendor_name: String,
    pub vendor_sku: Option<String>,
    pub selling_price: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub is_confirmed: bool,
    pub commission_rate: Option<f64>,
    pub source_quote_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferType {
    Quote,
    Affiliate,
    Catalog,
}

impl OfferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferType::Quote => "quote",
            OfferType::Affiliate => "affiliate",
            OfferType::Catalog => "catalog",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "quote" => OfferType::Quote,
            "affiliate" => OfferType::Affiliate,
            _ => OfferType::Catalog,
        }
    }
}

/// Monetization link for an external marketplace listing, unique by
/// `(platform, platform_id)`. `affiliate_url` is empty until the
/// external worker resolves it; worker failures are stored in place
/// with an `ERROR: ` prefix so they stay visible and requeueable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateLink {
    pub id: String,
    pub product_id: Option<String>,
    pub platform: String,
    pub platform_id: String,
    pub original_url: String,
    pub affiliate_url: String,
    pub is_processing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AffiliateLink {
    pub fn is_errored(&self) -> bool {
        self.affiliate_url.starts_with("ERROR:")
    }

    pub fn is_resolved(&self) -> bool {
        !self.affiliate_url.is_empty() && !self.is_errored()
    }
}

/// Resolution state of a marketplace link, carried on ranked results
/// so callers can branch on it without probing attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    Resolved(AffiliateLink),
    Pending { correlation_id: String },
    Unknown,
}

/// An uploaded vendor quote.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub id: String,
    pub vendor_name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// One line item of a quote, as extracted upstream.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteItem {
    pub id: String,
    pub quote_id: String,
    pub line_number: i64,
    pub description: String,
    pub part_number: Option<String>,
    pub manufacturer_name: Option<String>,
    pub quantity: i64,
    pub unit_price: Option<Decimal>,
}

/// Fields for creating (or converging on) a product row.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub manufacturer_id: String,
    pub part_number: String,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub status: ProductStatus,
    pub source: ProductSource,
    pub is_demo: bool,
    pub is_placeholder: bool,
}

/// Fields for creating an offer row.
#[derive(Debug, Clone)]
pub struct NewOffer {
    pub product_id: String,
    pub offer_type: OfferType,
    pub vendor_name: String,
    pub vendor_sku: Option<String>,
    pub selling_price: Decimal,
    pub currency: String,
    pub is_confirmed: bool,
    pub source_quote_id: Option<String>,
}

/// Which strategy produced a match candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExactId,
    FuzzyId,
    BrandKeyword,
    DescriptionSimilarity,
    Synthetic,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::ExactId => "exact_id",
            MatchMethod::FuzzyId => "fuzzy_id",
            MatchMethod::BrandKeyword => "brand_keyword",
            MatchMethod::DescriptionSimilarity => "description_similarity",
            MatchMethod::Synthetic => "synthetic",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "fuzzy_id" => MatchMethod::FuzzyId,
            "brand_keyword" => MatchMethod::BrandKeyword,
            "description_similarity" => MatchMethod::DescriptionSimilarity,
            "synthetic" => MatchMethod::Synthetic,
            _ => MatchMethod::ExactId,
        }
    }
}

/// Scored output of one matching strategy. Ephemeral; persisted only
/// when promoted to a match record for a quote item.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub product: Product,
    pub confidence: f64,
    pub is_exact: bool,
    pub method: MatchMethod,
    pub price_delta: Decimal,
    pub price_delta_pct: f64,
    pub is_demo_price: bool,
    pub details: Value,
}

/// Persisted match linking a quote item to a product. Replaced
/// wholesale on re-match, never edited.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRecord {
    pub id: String,
    pub quote_item_id: String,
    pub product_id: String,
    pub confidence: f64,
    pub is_exact: bool,
    pub method: MatchMethod,
    pub price_delta: Decimal,
    pub price_delta_pct: f64,
    pub is_demo_price: bool,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Query input for the match strategy chain.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub part_number: Option<String>,
    pub description: String,
    pub manufacturer_hint: Option<String>,
    pub unit_price: Option<Decimal>,
}

/// Ranking tier of a reconciliation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultGroup {
    Internal,
    PendingExternal,
    Accessory,
}

impl ResultGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultGroup::Internal => "internal",
            ResultGroup::PendingExternal => "pending_external",
            ResultGroup::Accessory => "accessory",
        }
    }
}

/// One entry of a reconciliation response, already ranked.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub group: ResultGroup,
    pub title: String,
    pub part_number: Option<String>,
    pub manufacturer_name: Option<String>,
    pub product: Option<Product>,
    pub confidence: f64,
    pub is_exact_match: bool,
    pub method: Option<MatchMethod>,
    pub is_amazon_product: bool,
    pub is_demo_price: bool,
    pub price: Option<Decimal>,
    pub link: LinkState,
}

/// External task kinds the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AffiliateLink,
    ProductSearch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AffiliateLink => "affiliate_link",
            TaskKind::ProductSearch => "product_search",
        }
    }
}

/// Payload handed to the external worker at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupTask {
    pub kind: TaskKind,
    pub correlation_id: String,
    pub payload: Value,
}

/// Cache record for a dispatched, unresolved lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLookup {
    pub kind: TaskKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Success,
    Error,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Success => "success",
            LookupStatus::Error => "error",
        }
    }
}

/// Cache record for a resolved lookup, kept until polled once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupOutcome {
    pub status: LookupStatus,
    pub affiliate_url: Option<String>,
    pub product_id: Option<String>,
    pub message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Callback body posted by the external worker. Field names follow
/// the worker's wire format.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCallback {
    pub affiliate_url: Option<String>,
    pub error: Option<String>,
    pub price: Option<f64>,
    pub title: Option<String>,
    pub part_number: Option<String>,
    pub asin: Option<String>,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub technical_details: Option<Value>,
}

/// Summary returned by quote matching.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteMatchSummary {
    pub quote_id: String,
    pub total_items: i64,
    pub matched_items: i64,
    pub demo_products_created: i64,
}

/// Summary returned by the requeue operation.
#[derive(Debug, Clone, Serialize)]
pub struct RequeueReport {
    pub scanned: i64,
    pub requeued: i64,
    pub dry_run: bool,
}
