//! Database statistics overview.
//!
//! A quick summary of the catalog: manufacturer/product/offer counts,
//! affiliate link resolution states, quote volume, and match method
//! breakdowns. Used by `recon stats` to confirm imports and matching
//! runs landed as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let manufacturers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM manufacturers")
        .fetch_one(&pool)
        .await?;
    let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&pool)
        .await?;
    let demo_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_demo = 1")
        .fetch_one(&pool)
        .await?;
    let placeholders: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_placeholder = 1")
            .fetch_one(&pool)
            .await?;
    let active_offers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offers WHERE is_active = 1")
        .fetch_one(&pool)
        .await?;

    let resolved_links: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM affiliate_links WHERE affiliate_url != '' AND affiliate_url NOT LIKE 'ERROR:%'",
    )
    .fetch_one(&pool)
    .await?;
    let errored_links: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM affiliate_links WHERE affiliate_url LIKE 'ERROR:%'")
            .fetch_one(&pool)
            .await?;
    let pending_links: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM affiliate_links WHERE affiliate_url = ''")
            .fetch_one(&pool)
            .await?;

    let quotes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotes")
        .fetch_one(&pool)
        .await?;
    let quote_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quote_items")
        .fetch_one(&pool)
        .await?;
    let matches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_matches")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.database.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Product Recon — Database Stats");
    println!("==============================");
    println!();
    println!("  Database:      {}", config.database.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Manufacturers: {}", manufacturers);
    println!(
        "  Products:      {} ({} demo, {} placeholders)",
        products, demo_products, placeholders
    );
    println!("  Offers:        {} active", active_offers);
    println!(
        "  Links:         {} resolved / {} pending / {} errored",
        resolved_links, pending_links, errored_links
    );
    println!("  Quotes:        {} ({} items)", quotes, quote_items);
    println!("  Matches:       {}", matches);

    // Per-source product breakdown
    let source_rows = sqlx::query(
        r#"
        SELECT
            p.source,
            COUNT(DISTINCT p.id) AS product_count,
            COUNT(o.id) AS offer_count
        FROM products p
        LEFT JOIN offers o ON o.product_id = p.id AND o.is_active = 1
        GROUP BY p.source
        ORDER BY product_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !source_rows.is_empty() {
        println!();
        println!("  By product source:");
        println!("  {:<16} {:>10} {:>8}", "SOURCE", "PRODUCTS", "OFFERS");
        println!("  {}", "-".repeat(36));
        for row in &source_rows {
            println!(
                "  {:<16} {:>10} {:>8}",
                row.get::<String, _>("source"),
                row.get::<i64, _>("product_count"),
                row.get::<i64, _>("offer_count"),
            );
        }
    }

    // Match method breakdown
    let method_rows = sqlx::query(
        r#"
        SELECT method, COUNT(*) AS match_count, AVG(confidence) AS avg_confidence
        FROM product_matches
        GROUP BY method
        ORDER BY match_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !method_rows.is_empty() {
        println!();
        println!("  By match method:");
        println!("  {:<24} {:>8} {:>12}", "METHOD", "MATCHES", "AVG CONF");
        println!("  {}", "-".repeat(46));
        for row in &method_rows {
            println!(
                "  {:<24} {:>8} {:>12.2}",
                row.get::<String, _>("method"),
                row.get::<i64, _>("match_count"),
                row.get::<f64, _>("avg_confidence"),
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
