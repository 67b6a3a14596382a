//! Catalog and quote ingestion.
//!
//! One JSON document can seed any mix of manufacturers, products with
//! catalog offers, and quotes with line items. Products are upserted
//! on (manufacturer, part number) so re-importing a file converges
//! instead of duplicating rows; importing a part that was previously
//! only demand-recorded upgrades the placeholder into a live product.
//! Quotes are always created fresh and their ids printed, since quote
//! matching is addressed by id.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::migrate::CANONICAL_PART_EXPR;
use crate::normalize::{normalize_identifier, parse_price};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ImportDocument {
    manufacturers: Vec<ImportManufacturer>,
    products: Vec<ImportProduct>,
    quotes: Vec<ImportQuote>,
}

#[derive(Debug, Deserialize)]
struct ImportManufacturer {
    name: String,
    website: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportProduct {
    manufacturer: String,
    part_number: String,
    name: String,
    #[serde(default)]
    description: String,
    category: Option<String>,
    #[serde(default)]
    offers: Vec<ImportOffer>,
}

#[derive(Debug, Deserialize)]
struct ImportOffer {
    vendor: String,
    price: String,
    vendor_sku: Option<String>,
    #[serde(default = "default_currency")]
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ImportQuote {
    vendor_name: Option<String>,
    items: Vec<ImportQuoteItem>,
}

#[derive(Debug, Deserialize)]
struct ImportQuoteItem {
    line_number: Option<i64>,
    description: String,
    part_number: Option<String>,
    manufacturer: Option<String>,
    #[serde(default = "default_quantity")]
    quantity: i64,
    unit_price: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_quantity() -> i64 {
    1
}

pub async fn run_import(config: &Config, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let document: ImportDocument = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid import document: {}", file.display()))?;

    let pool = db::connect(config).await?;

    for manufacturer in &document.manufacturers {
        upsert_manufacturer(&pool, &manufacturer.name, manufacturer.website.as_deref()).await?;
    }

    let mut products_new = 0u64;
    let mut products_updated = 0u64;
    let mut offers_written = 0u64;
    for product in &document.products {
        let manufacturer_id = upsert_manufacturer(&pool, &product.manufacturer, None).await?;
        let (product_id, created) = upsert_product(&pool, &manufacturer_id, product).await?;
        if created {
            products_new += 1;
        } else {
            products_updated += 1;
        }
        for offer in &product.offers {
            upsert_catalog_offer(&pool, &product_id, offer).await?;
            offers_written += 1;
        }
    }

    println!("import {}", file.display());
    println!("  manufacturers: {}", document.manufacturers.len());
    println!("  products: {products_new} new, {products_updated} updated");
    println!("  offers written: {offers_written}");

    let mut items_total = 0u64;
    for quote in &document.quotes {
        let (quote_id, items) = insert_quote(&pool, quote).await?;
        items_total += items;
        println!("  quote {quote_id}: {items} items");
    }
    if !document.quotes.is_empty() {
        println!("  quotes created: {} ({items_total} items)", document.quotes.len());
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Find or create a manufacturer by name, returning its id. A website
/// in the import wins over a stored NULL.
async fn upsert_manufacturer(
    pool: &SqlitePool,
    name: &str,
    website: Option<&str>,
) -> Result<String> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM manufacturers WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;

    if let Some(id) = existing {
        if let Some(site) = website {
            sqlx::query("UPDATE manufacturers SET website = ?, updated_at = ? WHERE id = ?")
                .bind(site)
                .bind(Utc::now().to_rfc3339())
                .bind(&id)
                .execute(pool)
                .await?;
        }
        return Ok(id);
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO manufacturers (id, name, website, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(website)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM manufacturers WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

async fn upsert_product(
    pool: &SqlitePool,
    manufacturer_id: &str,
    import: &ImportProduct,
) -> Result<(String, bool)> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM products WHERE manufacturer_id = ? AND part_number = ?",
    )
    .bind(manufacturer_id)
    .bind(&import.part_number)
    .fetch_optional(pool)
    .await?;

    // A part only seen as recorded demand sits under the fallback
    // manufacturer; claim that row instead of inserting a second one.
    if existing.is_none() {
        let sql = format!(
            "SELECT id FROM products WHERE is_placeholder = 1 AND {CANONICAL_PART_EXPR} = ?"
        );
        let placeholder: Option<String> = sqlx::query_scalar(&sql)
            .bind(normalize_identifier(&import.part_number))
            .fetch_optional(pool)
            .await?;
        if let Some(id) = placeholder {
            sqlx::query(
                r#"
                UPDATE products
                SET manufacturer_id = ?, part_number = ?, name = ?, description = ?,
                    category = ?, status = 'active', source = 'manual', is_placeholder = 0,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(manufacturer_id)
            .bind(&import.part_number)
            .bind(&import.name)
            .bind(&import.description)
            .bind(&import.category)
            .bind(Utc::now().to_rfc3339())
            .bind(&id)
            .execute(pool)
            .await?;
            return Ok((id, false));
        }
    }

    let created = existing.is_none();
    let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO products (id, manufacturer_id, part_number, name, description, category,
                              status, source, is_demo, is_placeholder, future_demand_count,
                              last_demand_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'active', 'manual', 0, 0, 0, NULL, ?, ?)
        ON CONFLICT(manufacturer_id, part_number) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            category = excluded.category,
            status = 'active',
            source = 'manual',
            is_placeholder = 0,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&id)
    .bind(manufacturer_id)
    .bind(&import.part_number)
    .bind(&import.name)
    .bind(&import.description)
    .bind(&import.category)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok((id, created))
}

/// Catalog offers carry no source quote, which keeps them outside the
/// offers table's uniqueness constraint. Dedup on (product, vendor)
/// by hand.
async fn upsert_catalog_offer(
    pool: &SqlitePool,
    product_id: &str,
    import: &ImportOffer,
) -> Result<()> {
    let price = parse_price(&import.price);
    let now = Utc::now().to_rfc3339();

    let existing: Option<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM offers
        WHERE product_id = ? AND vendor_name = ?
          AND offer_type = 'catalog' AND source_quote_id IS NULL
        "#,
    )
    .bind(product_id)
    .bind(&import.vendor)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = existing {
        sqlx::query(
            r#"
            UPDATE offers
            SET selling_price = ?, vendor_sku = ?, currency = ?, is_active = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(price.to_string())
        .bind(&import.vendor_sku)
        .bind(&import.currency)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO offers (id, product_id, offer_type, vendor_name, vendor_sku, selling_price,
                            currency, is_active, is_confirmed, commission_rate, source_quote_id,
                            created_at, updated_at)
        VALUES (?, ?, 'catalog', ?, ?, ?, ?, 1, 1, NULL, NULL, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(product_id)
    .bind(&import.vendor)
    .bind(&import.vendor_sku)
    .bind(price.to_string())
    .bind(&import.currency)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_quote(pool: &SqlitePool, import: &ImportQuote) -> Result<(String, u64)> {
    let mut tx = pool.begin().await?;

    let quote_id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO quotes (id, vendor_name, status, created_at) VALUES (?, ?, 'received', ?)")
        .bind(&quote_id)
        .bind(&import.vendor_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

    let mut line = 0i64;
    let mut items = 0u64;
    for item in &import.items {
        if item.description.trim().is_empty() {
            continue;
        }
        line = item.line_number.unwrap_or(line + 1);
        let unit_price = item
            .unit_price
            .as_deref()
            .map(|raw| parse_price(raw).to_string());
        sqlx::query(
            r#"
            INSERT INTO quote_items (id, quote_id, line_number, description, part_number,
                                     manufacturer_name, quantity, unit_price)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&quote_id)
        .bind(line)
        .bind(&item.description)
        .bind(&item.part_number)
        .bind(&item.manufacturer)
        .bind(item.quantity)
        .bind(unit_price)
        .execute(&mut *tx)
        .await?;
        items += 1;
    }

    tx.commit().await?;
    Ok((quote_id, items))
}
