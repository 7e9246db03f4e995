//! # Seed Data Generator
//!
//! Populates a development database with brands, two inventories, products
//! with stock and exchange rates.
//!
//! ## Usage
//! ```bash
//! # Default database ./tienda_dev.db
//! cargo run -p tienda-db --bin seed
//!
//! # Specify database path and rates
//! cargo run -p tienda-db --bin seed -- --db ./data/tienda.db --bcv 36.5 --paralelo 40
//! ```
//!
//! ## Generated Data
//! - Brands: Polar, PAN, Mavesa, Nestlé
//! - Inventories: "Tienda" and "Depósito"
//! - One product per catalog entry; price is cost plus a margin
//! - Opening stock loaded as purchases, so it shows up in history

use std::env;

use chrono::Utc;
use tienda_core::commit::{plan_purchase, PlanContext};
use tienda_core::idempotency::generate_op_id;
use tienda_core::{ExchangeRates, LineItem, OperationKind, ScreenKind, Tab};
use tienda_db::{Database, DbConfig, ProductDraft};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// (brand, product name, cost in USD)
const CATALOG: &[(&str, &str, f64)] = &[
    ("PAN", "Harina PAN 1kg", 1.05),
    ("PAN", "Harina PAN Blanca 1kg", 1.10),
    ("Polar", "Cerveza Polar Pilsen", 0.70),
    ("Polar", "Malta Polar", 0.65),
    ("Mavesa", "Mayonesa Mavesa 445g", 2.40),
    ("Mavesa", "Margarina Mavesa 500g", 2.10),
    ("Mavesa", "Jabón Las Llaves", 0.90),
    ("Nestlé", "Nescafé Clásico 100g", 4.80),
    ("Nestlé", "Leche Carabobo 900g", 7.20),
    ("Nestlé", "Chocolate Savoy Leche", 0.85),
];

/// Margin applied on top of cost to get the sale price.
const MARGIN: f64 = 0.35;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./tienda_dev.db");
    let mut rates = ExchangeRates::new(36.5, 40.0);

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" if i + 1 < args.len() => {
                db_path = args[i + 1].clone();
                i += 1;
            }
            "--bcv" if i + 1 < args.len() => {
                rates.bcv = args[i + 1].parse().unwrap_or(rates.bcv);
                i += 1;
            }
            "--paralelo" if i + 1 < args.len() => {
                rates.paralelo = args[i + 1].parse().unwrap_or(rates.paralelo);
                i += 1;
            }
            "--help" | "-h" => {
                println!("Tienda POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: ./tienda_dev.db)");
                println!("      --bcv <RATE>      BCV rate, Bs per USD (default: 36.5)");
                println!("      --paralelo <RATE> Parallel rate, Bs per USD (default: 40)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(path = %db_path, "Seeding database");
    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products, skipping seed");
        return Ok(());
    }

    db.catalog().set_exchange_rates(rates).await?;

    let mut brand_ids = std::collections::BTreeMap::new();
    for (brand, _, _) in CATALOG {
        if !brand_ids.contains_key(brand) {
            let created = db.catalog().create_brand(brand).await?;
            brand_ids.insert(*brand, created.id);
        }
    }

    let store = db.catalog().create_inventory("Tienda").await?;
    let warehouse = db.catalog().create_inventory("Depósito").await?;

    let mut store_tab = Tab::new("1");
    let mut warehouse_tab = Tab::new("1");
    for (index, (brand, name, cost)) in CATALOG.iter().enumerate() {
        let draft = ProductDraft {
            name: name.to_string(),
            brand_id: brand_ids.get(brand).cloned(),
            cost: *cost,
            price: (cost * (1.0 + MARGIN) * 100.0).round() / 100.0,
            image_url: None,
        };
        let op_id = generate_op_id(OperationKind::ProductCreate, "new", Utc::now());
        let (_, product) = db.products().create(&op_id, draft, Some("seed")).await?;

        let quantity = 6 + (index as i64 * 7) % 30;
        store_tab
            .cart
            .push(LineItem::from_product(&product, ScreenKind::Buys, quantity, rates));
        warehouse_tab
            .cart
            .push(LineItem::from_product(&product, ScreenKind::Buys, quantity * 4, rates));
    }

    for (inventory, tab) in [(&store, &store_tab), (&warehouse, &warehouse_tab)] {
        let op_id = generate_op_id(OperationKind::Purchase, &inventory.id, Utc::now());
        let ctx = PlanContext {
            op_id: &op_id,
            rates,
            user_id: Some("seed"),
            now: Utc::now(),
        };
        let plan = plan_purchase(ctx, tab, Some(&inventory.id))?;
        db.ledger().commit(&plan).await?;
        info!(inventory = %inventory.name, lines = tab.cart.len(), "Opening stock loaded");
    }

    info!(
        products = db.products().count().await?,
        inventories = 2,
        bcv = rates.bcv,
        paralelo = rates.paralelo,
        "Seed complete"
    );
    Ok(())
}
