//! Repository layer over the catalog database.
//!
//! The matching pipeline and the lookup state machine never touch SQL
//! directly; they speak [`CatalogStore`], which returns plain
//! collections and `Option`s. "Not found" is an ordinary value here,
//! never an error. The SQLite implementation uses check-before-create
//! and upsert statements at every persistence point so that concurrent
//! duplicate work converges instead of conflicting.

use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::migrate::CANONICAL_PART_EXPR;
use crate::models::{
    AffiliateLink, Manufacturer, MatchCandidate, NewOffer, NewProduct, Product, ProductSource,
    ProductStatus, Quote, QuoteItem,
};
use crate::normalize::normalize_identifier;

/// Catalog access used by the matching chain, the orchestrator, and
/// the lookup state machine.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Active products whose canonical part number equals `canonical`.
    async fn find_products_exact(&self, canonical: &str) -> Result<Vec<Product>>;

    /// Active products whose part number contains any of `fragments`
    /// (case-insensitive), excluding canonical equals of the query.
    async fn find_products_fragment(
        &self,
        fragments: &[String],
        exclude_canonical: &str,
        limit: i64,
    ) -> Result<Vec<Product>>;

    /// Single product lookup by canonical part number, any status.
    async fn find_product_by_part_number(&self, part_number: &str) -> Result<Option<Product>>;

    async fn find_manufacturers_named(&self, fragment: &str) -> Result<Vec<Manufacturer>>;

    async fn find_active_products_of_manufacturer(
        &self,
        manufacturer_id: &str,
    ) -> Result<Vec<Product>>;

    /// Active products whose name or description contains any keyword.
    async fn find_products_by_keywords(
        &self,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<Product>>;

    async fn get_or_create_manufacturer(&self, name: &str) -> Result<Manufacturer>;

    /// Returns the product and whether it was newly created.
    async fn get_or_create_product(&self, new: NewProduct) -> Result<(Product, bool)>;

    /// Upsert a placeholder row for an unmatched query and bump its
    /// demand counter.
    async fn record_future_demand(&self, description: &str, part_number: Option<&str>)
        -> Result<()>;

    /// Lowest active selling price for a product, if it has offers.
    async fn best_active_price(&self, product_id: &str) -> Result<Option<Decimal>>;

    async fn create_offer(&self, new: NewOffer) -> Result<String>;

    /// Create or refresh the unconfirmed quote-priced offer for a
    /// matched product. Returns true when a new offer row was created.
    async fn upsert_quote_offer(
        &self,
        product_id: &str,
        quote: &Quote,
        item: &QuoteItem,
    ) -> Result<bool>;

    async fn get_link(&self, platform: &str, platform_id: &str) -> Result<Option<AffiliateLink>>;

    /// Idempotently make sure a link row exists for the listing.
    /// Returns the link and whether this call created it.
    async fn ensure_link(
        &self,
        platform: &str,
        platform_id: &str,
        original_url: &str,
    ) -> Result<(AffiliateLink, bool)>;

    async fn update_link_result(
        &self,
        link_id: &str,
        affiliate_url: &str,
        product_id: Option<&str>,
    ) -> Result<()>;

    async fn product_has_resolved_link(&self, product_id: &str) -> Result<bool>;

    /// Links whose resolution is missing or errored, oldest first.
    async fn list_requeue_candidates(
        &self,
        platform: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<AffiliateLink>>;

    async fn get_quote(&self, quote_id: &str) -> Result<Option<Quote>>;

    async fn list_quote_items(&self, quote_id: &str) -> Result<Vec<QuoteItem>>;

    async fn delete_matches(&self, quote_item_id: &str) -> Result<()>;

    async fn insert_matches(
        &self,
        quote_item_id: &str,
        candidates: &[MatchCandidate],
    ) -> Result<()>;
}

// ============ SQLite implementation ============

const PRODUCT_COLS: &str = "p.id, p.manufacturer_id, m.name AS manufacturer_name, p.part_number, \
     p.name, p.description, p.category, p.status, p.source, p.is_demo, p.is_placeholder, \
     p.future_demand_count, p.last_demand_at, p.created_at, p.updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn product_from_row(row: &SqliteRow) -> Product {
        Product {
            id: row.get("id"),
            manufacturer_id: row.get("manufacturer_id"),
            manufacturer_name: row.get("manufacturer_name"),
            part_number: row.get("part_number"),
            name: row.get("name"),
            description: row.get("description"),
            category: row.get("category"),
            status: ProductStatus::parse(row.get::<String, _>("status").as_str()),
            source: ProductSource::parse(row.get::<String, _>("source").as_str()),
            is_demo: row.get::<i64, _>("is_demo") != 0,
            is_placeholder: row.get::<i64, _>("is_placeholder") != 0,
            future_demand_count: row.get("future_demand_count"),
            last_demand_at: row
                .get::<Option<String>, _>("last_demand_at")
                .as_deref()
                .map(parse_ts),
            created_at: parse_ts(row.get::<String, _>("created_at").as_str()),
            updated_at: parse_ts(row.get::<String, _>("updated_at").as_str()),
        }
    }

    fn link_from_row(row: &SqliteRow) -> AffiliateLink {
        AffiliateLink {
            id: row.get("id"),
            product_id: row.get("product_id"),
            platform: row.get("platform"),
            platform_id: row.get("platform_id"),
            original_url: row.get("original_url"),
            affiliate_url: row.get("affiliate_url"),
            is_processing: row.get::<i64, _>("is_processing") != 0,
            created_at: parse_ts(row.get::<String, _>("created_at").as_str()),
            updated_at: parse_ts(row.get::<String, _>("updated_at").as_str()),
        }
    }

    fn item_from_row(row: &SqliteRow) -> QuoteItem {
        QuoteItem {
            id: row.get("id"),
            quote_id: row.get("quote_id"),
            line_number: row.get("line_number"),
            description: row.get("description"),
            part_number: row.get("part_number"),
            manufacturer_name: row.get("manufacturer_name"),
            quantity: row.get("quantity"),
            unit_price: row
                .get::<Option<String>, _>("unit_price")
                .as_deref()
                .and_then(|s| Decimal::from_str(s).ok()),
        }
    }

    fn manufacturer_from_row(row: &SqliteRow) -> Manufacturer {
        Manufacturer {
            id: row.get("id"),
            name: row.get("name"),
            website: row.get("website"),
            created_at: parse_ts(row.get::<String, _>("created_at").as_str()),
            updated_at: parse_ts(row.get::<String, _>("updated_at").as_str()),
        }
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn find_products_exact(&self, canonical: &str) -> Result<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLS} FROM products p \
             JOIN manufacturers m ON m.id = p.manufacturer_id \
             WHERE p.status = 'active' AND {CANONICAL_PART_EXPR} = ?"
        );
        let rows = sqlx::query(&sql).bind(canonical).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::product_from_row).collect())
    }

    async fn find_products_fragment(
        &self,
        fragments: &[String],
        exclude_canonical: &str,
        limit: i64,
    ) -> Result<Vec<Product>> {
        if fragments.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {PRODUCT_COLS} FROM products p \
             JOIN manufacturers m ON m.id = p.manufacturer_id \
             WHERE p.status = 'active' AND ("
        );
        for (i, _) in fragments.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            sql.push_str("UPPER(p.part_number) LIKE '%' || ? || '%'");
        }
        sql.push_str(&format!(") AND {CANONICAL_PART_EXPR} != ? LIMIT ?"));

        let mut query = sqlx::query(&sql);
        for fragment in fragments {
            query = query.bind(fragment.to_uppercase());
        }
        let rows = query
            .bind(exclude_canonical)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::product_from_row).collect())
    }

    async fn find_product_by_part_number(&self, part_number: &str) -> Result<Option<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLS} FROM products p \
             JOIN manufacturers m ON m.id = p.manufacturer_id \
             WHERE {CANONICAL_PART_EXPR} = ? LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(normalize_identifier(part_number))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::product_from_row))
    }

    async fn find_manufacturers_named(&self, fragment: &str) -> Result<Vec<Manufacturer>> {
        let rows = sqlx::query(
            "SELECT id, name, website, created_at, updated_at FROM manufacturers \
             WHERE LOWER(name) LIKE '%' || LOWER(?) || '%' ORDER BY name",
        )
        .bind(fragment)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::manufacturer_from_row).collect())
    }

    async fn find_active_products_of_manufacturer(
        &self,
        manufacturer_id: &str,
    ) -> Result<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLS} FROM products p \
             JOIN manufacturers m ON m.id = p.manufacturer_id \
             WHERE p.status = 'active' AND p.manufacturer_id = ?"
        );
        let rows = sqlx::query(&sql)
            .bind(manufacturer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::product_from_row).collect())
    }

    async fn find_products_by_keywords(
        &self,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<Product>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {PRODUCT_COLS} FROM products p \
             JOIN manufacturers m ON m.id = p.manufacturer_id \
             WHERE p.status = 'active' AND ("
        );
        for (i, _) in keywords.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            sql.push_str(
                "(LOWER(p.name) LIKE '%' || ? || '%' OR LOWER(p.description) LIKE '%' || ? || '%')",
            );
        }
        sql.push_str(") LIMIT ?");

        let mut query = sqlx::query(&sql);
        for keyword in keywords {
            query = query.bind(keyword.as_str()).bind(keyword.as_str());
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::product_from_row).collect())
    }

    async fn get_or_create_manufacturer(&self, name: &str) -> Result<Manufacturer> {
        let existing = sqlx::query(
            "SELECT id, name, website, created_at, updated_at FROM manufacturers WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = existing {
            return Ok(Self::manufacturer_from_row(&row));
        }

        let now = now_str();
        sqlx::query(
            "INSERT INTO manufacturers (id, name, website, created_at, updated_at) \
             VALUES (?, ?, NULL, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, name, website, created_at, updated_at FROM manufacturers WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::manufacturer_from_row(&row))
    }

    async fn get_or_create_product(&self, new: NewProduct) -> Result<(Product, bool)> {
        let fetch_sql = format!(
            "SELECT {PRODUCT_COLS} FROM products p \
             JOIN manufacturers m ON m.id = p.manufacturer_id \
             WHERE p.manufacturer_id = ? AND p.part_number = ? LIMIT 1"
        );

        let existing = sqlx::query(&fetch_sql)
            .bind(&new.manufacturer_id)
            .bind(&new.part_number)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = existing {
            return Ok((Self::product_from_row(&row), false));
        }

        let now = now_str();
        sqlx::query(
            r#"
            INSERT INTO products (id, manufacturer_id, part_number, name, description, category,
                                  status, source, is_demo, is_placeholder, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(manufacturer_id, part_number) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&new.manufacturer_id)
        .bind(&new.part_number)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.category)
        .bind(new.status.as_str())
        .bind(new.source.as_str())
        .bind(new.is_demo as i64)
        .bind(new.is_placeholder as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&fetch_sql)
            .bind(&new.manufacturer_id)
            .bind(&new.part_number)
            .fetch_one(&self.pool)
            .await?;
        Ok((Self::product_from_row(&row), true))
    }

    async fn record_future_demand(
        &self,
        description: &str,
        part_number: Option<&str>,
    ) -> Result<()> {
        let manufacturer = self.get_or_create_manufacturer("Unknown Manufacturer").await?;

        // Stable surrogate key so repeated identical queries hit the
        // same placeholder row
        let surrogate = match part_number {
            Some(pn) if !pn.trim().is_empty() => pn.trim().to_string(),
            _ => {
                let canon = normalize_identifier(description);
                canon.chars().take(40).collect()
            }
        };
        if surrogate.is_empty() {
            return Ok(());
        }

        let name: String = description.chars().take(100).collect();
        let now = now_str();
        sqlx::query(
            r#"
            INSERT INTO products (id, manufacturer_id, part_number, name, description, category,
                                  status, source, is_demo, is_placeholder, future_demand_count,
                                  last_demand_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, NULL, 'inactive', 'future', 0, 1, 1, ?, ?, ?)
            ON CONFLICT(manufacturer_id, part_number) DO UPDATE SET
                future_demand_count = future_demand_count + 1,
                last_demand_at = excluded.last_demand_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&manufacturer.id)
        .bind(&surrogate)
        .bind(&name)
        .bind(description)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn best_active_price(&self, product_id: &str) -> Result<Option<Decimal>> {
        let price: Option<String> = sqlx::query_scalar(
            "SELECT selling_price FROM offers WHERE product_id = ? AND is_active = 1 \
             ORDER BY CAST(selling_price AS REAL) ASC LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(price.as_deref().and_then(|s| Decimal::from_str(s).ok()))
    }

    async fn create_offer(&self, new: NewOffer) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = now_str();
        sqlx::query(
            r#"
            INSERT INTO offers (id, product_id, offer_type, vendor_name, vendor_sku, selling_price,
                                currency, is_active, is_confirmed, source_quote_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
            ON CONFLICT(product_id, vendor_name, offer_type, source_quote_id) DO UPDATE SET
                selling_price = excluded.selling_price,
                vendor_sku = excluded.vendor_sku,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(&new.product_id)
        .bind(new.offer_type.as_str())
        .bind(&new.vendor_name)
        .bind(&new.vendor_sku)
        .bind(new.selling_price.to_string())
        .bind(&new.currency)
        .bind(new.is_confirmed as i64)
        .bind(&new.source_quote_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_quote_offer(
        &self,
        product_id: &str,
        quote: &Quote,
        item: &QuoteItem,
    ) -> Result<bool> {
        let unit_price = match item.unit_price {
            Some(p) => p,
            None => return Ok(false),
        };
        let vendor_name = quote
            .vendor_name
            .clone()
            .unwrap_or_else(|| format!("Quote Vendor {}", quote.id));

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM offers WHERE product_id = ? AND vendor_name = ? \
             AND offer_type = 'quote' AND source_quote_id = ?",
        )
        .bind(product_id)
        .bind(&vendor_name)
        .bind(&quote.id)
        .fetch_optional(&self.pool)
        .await?;

        let now = now_str();
        match existing {
            Some(offer_id) => {
                sqlx::query(
                    "UPDATE offers SET selling_price = ?, vendor_sku = ?, updated_at = ? WHERE id = ?",
                )
                .bind(unit_price.to_string())
                .bind(&item.part_number)
                .bind(&now)
                .bind(&offer_id)
                .execute(&self.pool)
                .await?;
                Ok(false)
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO offers (id, product_id, offer_type, vendor_name, vendor_sku,
                                        selling_price, currency, is_active, is_confirmed,
                                        source_quote_id, created_at, updated_at)
                    VALUES (?, ?, 'quote', ?, ?, ?, 'USD', 1, 0, ?, ?, ?)
                    ON CONFLICT(product_id, vendor_name, offer_type, source_quote_id) DO UPDATE SET
                        selling_price = excluded.selling_price,
                        vendor_sku = excluded.vendor_sku,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(product_id)
                .bind(&vendor_name)
                .bind(&item.part_number)
                .bind(unit_price.to_string())
                .bind(&quote.id)
                .bind(&now)
                .bind(&now)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
        }
    }

    async fn get_link(&self, platform: &str, platform_id: &str) -> Result<Option<AffiliateLink>> {
        let row = sqlx::query(
            "SELECT id, product_id, platform, platform_id, original_url, affiliate_url, \
             is_processing, created_at, updated_at FROM affiliate_links \
             WHERE platform = ? AND platform_id = ?",
        )
        .bind(platform)
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::link_from_row))
    }

    async fn ensure_link(
        &self,
        platform: &str,
        platform_id: &str,
        original_url: &str,
    ) -> Result<(AffiliateLink, bool)> {
        if let Some(link) = self.get_link(platform, platform_id).await? {
            return Ok((link, false));
        }

        let now = now_str();
        sqlx::query(
            r#"
            INSERT INTO affiliate_links (id, product_id, platform, platform_id, original_url,
                                         affiliate_url, is_processing, created_at, updated_at)
            VALUES (?, NULL, ?, ?, ?, '', 1, ?, ?)
            ON CONFLICT(platform, platform_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(platform)
        .bind(platform_id)
        .bind(original_url)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let link = self
            .get_link(platform, platform_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("link row vanished for {}/{}", platform, platform_id))?;
        Ok((link, true))
    }

    async fn update_link_result(
        &self,
        link_id: &str,
        affiliate_url: &str,
        product_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE affiliate_links SET affiliate_url = ?, \
             product_id = COALESCE(?, product_id), is_processing = 0, updated_at = ? WHERE id = ?",
        )
        .bind(affiliate_url)
        .bind(product_id)
        .bind(now_str())
        .bind(link_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn product_has_resolved_link(&self, product_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM affiliate_links WHERE product_id = ? \
             AND affiliate_url != '' AND affiliate_url NOT LIKE 'ERROR:%'",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn list_requeue_candidates(
        &self,
        platform: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<AffiliateLink>> {
        let mut sql = String::from(
            "SELECT id, product_id, platform, platform_id, original_url, affiliate_url, \
             is_processing, created_at, updated_at FROM affiliate_links \
             WHERE (affiliate_url = '' OR affiliate_url LIKE 'ERROR:%')",
        );
        if platform.is_some() {
            sql.push_str(" AND platform = ?");
        }
        sql.push_str(" ORDER BY created_at ASC");
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(p) = platform {
            query = query.bind(p);
        }
        if let Some(l) = limit {
            query = query.bind(l);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::link_from_row).collect())
    }

    async fn get_quote(&self, quote_id: &str) -> Result<Option<Quote>> {
        let row = sqlx::query("SELECT id, vendor_name, status, created_at FROM quotes WHERE id = ?")
            .bind(quote_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Quote {
            id: r.get("id"),
            vendor_name: r.get("vendor_name"),
            status: r.get("status"),
            created_at: parse_ts(r.get::<String, _>("created_at").as_str()),
        }))
    }

    async fn list_quote_items(&self, quote_id: &str) -> Result<Vec<QuoteItem>> {
        let rows = sqlx::query(
            "SELECT id, quote_id, line_number, description, part_number, manufacturer_name, \
             quantity, unit_price FROM quote_items WHERE quote_id = ? ORDER BY line_number",
        )
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::item_from_row).collect())
    }

    async fn delete_matches(&self, quote_item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM product_matches WHERE quote_item_id = ?")
            .bind(quote_item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_matches(
        &self,
        quote_item_id: &str,
        candidates: &[MatchCandidate],
    ) -> Result<()> {
        for candidate in candidates {
            sqlx::query(
                r#"
                INSERT INTO product_matches (id, quote_item_id, product_id, confidence, is_exact,
                                             method, price_delta, price_delta_pct, is_demo_price,
                                             details, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(quote_item_id, product_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(quote_item_id)
            .bind(&candidate.product.id)
            .bind(candidate.confidence)
            .bind(candidate.is_exact as i64)
            .bind(candidate.method.as_str())
            .bind(candidate.price_delta.to_string())
            .bind(candidate.price_delta_pct)
            .bind(candidate.is_demo_price as i64)
            .bind(candidate.details.to_string())
            .bind(now_str())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

// ============ In-memory implementation for engine tests ============
