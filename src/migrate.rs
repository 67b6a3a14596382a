use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Canonical part-number expression used by the exact-match query and
/// its covering index. Must stay in sync with `normalize_identifier`.
pub const CANONICAL_PART_EXPR: &str =
    "UPPER(REPLACE(REPLACE(REPLACE(part_number, '-', ''), '_', ''), ' ', ''))";

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create or upgrade the schema on an open pool. Every statement is
/// `IF NOT EXISTS`, so repeated runs converge.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manufacturers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            website TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            manufacturer_id TEXT NOT NULL,
            part_number TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            category TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            source TEXT NOT NULL DEFAULT 'manual',
            is_demo INTEGER NOT NULL DEFAULT 0,
            is_placeholder INTEGER NOT NULL DEFAULT 0,
            future_demand_count INTEGER NOT NULL DEFAULT 0,
            last_demand_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(manufacturer_id, part_number),
            FOREIGN KEY (manufacturer_id) REFERENCES manufacturers(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS offers (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            offer_type TEXT NOT NULL DEFAULT 'catalog',
            vendor_name TEXT NOT NULL,
            vendor_sku TEXT,
            selling_price TEXT NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            is_active INTEGER NOT NULL DEFAULT 1,
            is_confirmed INTEGER NOT NULL DEFAULT 1,
            commission_rate REAL,
            source_quote_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(product_id, vendor_name, offer_type, source_quote_id),
            FOREIGN KEY (product_id) REFERENCES products(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS affiliate_links (
            id TEXT PRIMARY KEY,
            product_id TEXT,
            platform TEXT NOT NULL,
            platform_id TEXT NOT NULL,
            original_url TEXT NOT NULL DEFAULT '',
            affiliate_url TEXT NOT NULL DEFAULT '',
            is_processing INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(platform, platform_id),
            FOREIGN KEY (product_id) REFERENCES products(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quotes (
            id TEXT PRIMARY KEY,
            vendor_name TEXT,
            status TEXT NOT NULL DEFAULT 'received',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quote_items (
            id TEXT PRIMARY KEY,
            quote_id TEXT NOT NULL,
            line_number INTEGER NOT NULL,
            description TEXT NOT NULL,
            part_number TEXT,
            manufacturer_name TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            unit_price TEXT,
            UNIQUE(quote_id, line_number),
            FOREIGN KEY (quote_id) REFERENCES quotes(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_matches (
            id TEXT PRIMARY KEY,
            quote_item_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            confidence REAL NOT NULL,
            is_exact INTEGER NOT NULL DEFAULT 0,
            method TEXT NOT NULL,
            price_delta TEXT NOT NULL DEFAULT '0.00',
            price_delta_pct REAL NOT NULL DEFAULT 0,
            is_demo_price INTEGER NOT NULL DEFAULT 0,
            details TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE(quote_item_id, product_id),
            FOREIGN KEY (quote_item_id) REFERENCES quote_items(id),
            FOREIGN KEY (product_id) REFERENCES products(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Pending-lookup and result records when no external cache is
    // wired in; expired rows are dropped lazily on read
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_cache (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_part_number ON products(part_number)")
        .execute(pool)
        .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_products_canonical_part ON products({CANONICAL_PART_EXPR})"
    ))
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_products_manufacturer ON products(manufacturer_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_product ON offers(product_id, is_active)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_quote_items_quote ON quote_items(quote_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_quote_item ON product_matches(quote_item_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_lookup_cache_expires ON lookup_cache(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}
