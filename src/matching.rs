//! Match strategy chain for quote line items.
//!
//! Strategies run in a fixed escalation order and later stages only
//! fire while earlier ones have left the result set thin: exact
//! always runs, fuzzy only when exact found nothing, manufacturer
//! narrowing below three candidates, description similarity below
//! two. Demo synthesis is last and only in demo mode, when nothing
//! strong was found. Output is deduplicated per product, sorted with
//! exact matches first, then confidence descending, and truncated.

use std::cmp::Ordering;

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

use crate::config::{DemoConfig, MatchingConfig};
use crate::models::{
    MatchCandidate, MatchMethod, MatchQuery, NewProduct, Product, ProductSource, ProductStatus,
};
use crate::normalize::{normalize_identifier, zero_price};
use crate::similarity::{extract_keywords, identifier_similarity, similarity};
use crate::store::CatalogStore;

const FUZZY_POOL_LIMIT: i64 = 10;
const DESCRIPTION_POOL_LIMIT: i64 = 20;
const FRAGMENT_LEN: usize = 6;
const MANUFACTURER_KEYWORDS: usize = 3;
const MANUFACTURER_TAKE: usize = 5;
const DESCRIPTION_KEYWORDS: usize = 5;

/// Result of running the full chain for one query.
pub struct ChainOutcome {
    pub candidates: Vec<MatchCandidate>,
    pub demo_created: bool,
}

pub struct MatchEngine<'a> {
    store: &'a dyn CatalogStore,
    matching: &'a MatchingConfig,
    demo: &'a DemoConfig,
}

impl<'a> MatchEngine<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        matching: &'a MatchingConfig,
        demo: &'a DemoConfig,
    ) -> Self {
        Self {
            store,
            matching,
            demo,
        }
    }

    /// Run the strategy chain for one query.
    pub async fn find_matches(&self, query: &MatchQuery, demo_mode: bool) -> Result<ChainOutcome> {
        let mut candidates = Vec::new();

        let part = query
            .part_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(part) = part {
            candidates.extend(self.exact_candidates(part, query).await?);
            if candidates.is_empty() {
                candidates.extend(self.fuzzy_candidates(part, query).await?);
            }
        }

        if candidates.len() < 3 {
            if let Some(hint) = query.manufacturer_hint.as_deref().filter(|s| !s.is_empty()) {
                candidates.extend(self.manufacturer_candidates(hint, query).await?);
            }
        }

        if candidates.len() < 2 {
            candidates.extend(self.description_candidates(query).await?);
        }

        let mut demo_created = false;
        let best = candidates
            .iter()
            .map(|c| c.confidence)
            .fold(0.0_f64, f64::max);
        if demo_mode && (candidates.is_empty() || best < self.matching.strong_confidence) {
            if let Some((candidate, created)) = self.demo_candidate(query).await? {
                demo_created = created;
                candidates.push(candidate);
            }
        }

        Ok(ChainOutcome {
            candidates: rank_candidates(candidates, self.matching.max_results),
            demo_created,
        })
    }

    // ============ Strategies ============

    async fn exact_candidates(
        &self,
        part: &str,
        query: &MatchQuery,
    ) -> Result<Vec<MatchCandidate>> {
        let canonical = normalize_identifier(part);
        if canonical.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for product in self.store.find_products_exact(&canonical).await? {
            let (price_delta, price_delta_pct) = self.price_delta(&product, query).await?;
            let manufacturer_match = query
                .manufacturer_hint
                .as_deref()
                .map(|h| hint_matches_manufacturer(h, &product.manufacturer_name))
                .unwrap_or(false);
            out.push(MatchCandidate {
                confidence: 1.0,
                is_exact: true,
                method: MatchMethod::ExactId,
                price_delta,
                price_delta_pct,
                is_demo_price: false,
                details: json!({
                    "matched_part_number": product.part_number,
                    "manufacturer_match": manufacturer_match,
                }),
                product,
            });
        }
        Ok(out)
    }

    async fn fuzzy_candidates(
        &self,
        part: &str,
        query: &MatchQuery,
    ) -> Result<Vec<MatchCandidate>> {
        let canonical = normalize_identifier(part);
        if canonical.is_empty() {
            return Ok(Vec::new());
        }

        // Candidate pool: anything sharing the leading fragment of
        // either the raw or the canonical form, exact equals excluded
        let raw_fragment: String = part.to_uppercase().chars().take(FRAGMENT_LEN).collect();
        let canonical_fragment: String = canonical.chars().take(FRAGMENT_LEN).collect();
        let mut fragments = vec![raw_fragment];
        if canonical_fragment != fragments[0] {
            fragments.push(canonical_fragment);
        }

        let pool = self
            .store
            .find_products_fragment(&fragments, &canonical, FUZZY_POOL_LIMIT)
            .await?;

        let mut out = Vec::new();
        for product in pool {
            let score = identifier_similarity(part, &product.part_number);
            if score <= self.matching.fuzzy_similarity_floor {
                continue;
            }

            let mut confidence = score * 0.9;
            if let Some(hint) = query.manufacturer_hint.as_deref() {
                if hint_matches_manufacturer(hint, &product.manufacturer_name) {
                    confidence = (confidence + 0.1).min(1.0);
                }
            }

            let (price_delta, price_delta_pct) = self.price_delta(&product, query).await?;
            out.push(MatchCandidate {
                confidence,
                is_exact: false,
                method: MatchMethod::FuzzyId,
                price_delta,
                price_delta_pct,
                is_demo_price: false,
                details: json!({
                    "similarity_score": score,
                    "matched_part_number": product.part_number,
                }),
                product,
            });
        }
        Ok(out)
    }

    async fn manufacturer_candidates(
        &self,
        hint: &str,
        query: &MatchQuery,
    ) -> Result<Vec<MatchCandidate>> {
        let manufacturers = self.store.find_manufacturers_named(hint).await?;
        if manufacturers.is_empty() {
            return Ok(Vec::new());
        }

        let keywords = extract_keywords(&query.description);
        let applied: Vec<String> = keywords
            .iter()
            .take(MANUFACTURER_KEYWORDS)
            .cloned()
            .collect();

        let mut out = Vec::new();
        for manufacturer in &manufacturers {
            let mut products = self
                .store
                .find_active_products_of_manufacturer(&manufacturer.id)
                .await?;
            for keyword in &applied {
                products.retain(|p| {
                    p.name.to_lowercase().contains(keyword.as_str())
                        || p.description.to_lowercase().contains(keyword.as_str())
                });
            }

            for product in products.into_iter().take(MANUFACTURER_TAKE) {
                let haystack = format!("{} {}", product.name, product.description);
                let desc_similarity = similarity(&query.description, &haystack);
                let confidence = (0.6 + desc_similarity * 0.3).min(1.0);

                let (price_delta, price_delta_pct) = self.price_delta(&product, query).await?;
                out.push(MatchCandidate {
                    confidence,
                    is_exact: false,
                    method: MatchMethod::BrandKeyword,
                    price_delta,
                    price_delta_pct,
                    is_demo_price: false,
                    details: json!({
                        "manufacturer_name": manufacturer.name,
                        "description_similarity": desc_similarity,
                        "matched_keywords": applied,
                    }),
                    product,
                });
            }
        }
        Ok(out)
    }

    async fn description_candidates(&self, query: &MatchQuery) -> Result<Vec<MatchCandidate>> {
        let keywords: Vec<String> = extract_keywords(&query.description)
            .into_iter()
            .take(DESCRIPTION_KEYWORDS)
            .collect();
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self
            .store
            .find_products_by_keywords(&keywords, DESCRIPTION_POOL_LIMIT)
            .await?;

        let mut out = Vec::new();
        for product in pool {
            let haystack = format!("{} {}", product.name, product.description);
            let desc_similarity = similarity(&query.description, &haystack);
            if desc_similarity <= self.matching.description_similarity_floor {
                continue;
            }

            let (price_delta, price_delta_pct) = self.price_delta(&product, query).await?;
            out.push(MatchCandidate {
                confidence: desc_similarity * 0.7,
                is_exact: false,
                method: MatchMethod::DescriptionSimilarity,
                price_delta,
                price_delta_pct,
                is_demo_price: false,
                details: json!({
                    "description_similarity": desc_similarity,
                    "matched_keywords": keywords,
                }),
                product,
            });
        }
        Ok(out)
    }

    /// Synthesize a demo product priced below the quoted price.
    /// Converges on one row per part number instead of creating a new
    /// product every run.
    async fn demo_candidate(&self, query: &MatchQuery) -> Result<Option<(MatchCandidate, bool)>> {
        let manufacturer_name = query
            .manufacturer_hint
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.demo.manufacturer_name.as_str());
        let manufacturer = self.store.get_or_create_manufacturer(manufacturer_name).await?;

        let part_number = match query
            .part_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(pn) => pn.to_string(),
            None => {
                let canonical = normalize_identifier(&query.description);
                format!("DEMO-{}", canonical.chars().take(24).collect::<String>())
            }
        };

        let display: String = query.description.chars().take(100).collect();
        let (product, created) = self
            .store
            .get_or_create_product(NewProduct {
                manufacturer_id: manufacturer.id.clone(),
                part_number,
                name: format!("DEMO: {display}"),
                description: format!("Demo product for quote analysis: {}", query.description),
                category: None,
                status: ProductStatus::Active,
                source: ProductSource::Demo,
                is_demo: true,
                is_placeholder: false,
            })
            .await?;

        let discount =
            Decimal::try_from(self.demo.discount_pct).unwrap_or_else(|_| Decimal::from(20));
        let (demo_price, price_delta, price_delta_pct) = match query.unit_price {
            Some(unit) => {
                let factor = (Decimal::from(100) - discount) / Decimal::from(100);
                let demo_price = (unit * factor).round_dp(2);
                (demo_price, demo_price - unit, -self.demo.discount_pct)
            }
            None => (zero_price(), zero_price(), 0.0),
        };

        let candidate = MatchCandidate {
            confidence: 0.95,
            is_exact: false,
            method: MatchMethod::Synthetic,
            price_delta,
            price_delta_pct,
            is_demo_price: true,
            details: json!({
                "demo_pricing_discount": self.demo.discount_pct,
                "original_price": query
                    .unit_price
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| zero_price().to_string()),
                "demo_price": demo_price.to_string(),
            }),
            product,
        };
        Ok(Some((candidate, created)))
    }

    /// Delta between our best active offer and the quoted unit price.
    /// Negative means the catalog undercuts the quote.
    async fn price_delta(&self, product: &Product, query: &MatchQuery) -> Result<(Decimal, f64)> {
        let unit = match query.unit_price {
            Some(u) if !u.is_zero() => u,
            _ => return Ok((zero_price(), 0.0)),
        };
        let best = match self.store.best_active_price(&product.id).await? {
            Some(b) => b,
            None => return Ok((zero_price(), 0.0)),
        };
        let delta = best - unit;
        let pct = (delta / unit * Decimal::from(100)).to_f64().unwrap_or(0.0);
        Ok((delta, pct))
    }
}

// ============ Ranking ============

fn hint_matches_manufacturer(hint: &str, manufacturer_name: &str) -> bool {
    !hint.is_empty()
        && manufacturer_name
            .to_lowercase()
            .contains(&hint.to_lowercase())
}

/// Deduplicate by product, keeping the highest-confidence entry, then
/// order exact first, confidence descending, and cap the list.
pub(crate) fn rank_candidates(
    candidates: Vec<MatchCandidate>,
    max_results: usize,
) -> Vec<MatchCandidate> {
    let mut deduped: Vec<MatchCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match deduped
            .iter_mut()
            .find(|c| c.product.id == candidate.product.id)
        {
            Some(existing) => {
                if candidate.confidence > existing.confidence {
                    *existing = candidate;
                }
            }
            None => deduped.push(candidate),
        }
    }

    deduped.sort_by(|a, b| {
        b.is_exact.cmp(&a.is_exact).then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
    });
    deduped.truncate(max_results);
    deduped
}
