//! Catalog seeder - loads the product catalog into the document store
//!
//! Seeds the default 37-product catalog (rupee prices) with derived
//! 9-digit barcodes. Intended for first-time setup against a fresh store
//! or the mock_store binary.
//!
//! Usage:
//!   cargo run --bin seed_catalog -- --store-url http://localhost:9090

use clap::Parser;
use scancart::domain::cart::ProductRecord;
use scancart::io::store::{DocumentStore, HttpStore};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "seed_catalog")]
#[command(about = "Seed the product catalog into the document store")]
struct Args {
    /// Document store base URL (may carry basic auth)
    #[arg(long, default_value = "http://localhost:9090")]
    store_url: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

/// The deployed product catalog: (name, price in rupees)
const PRODUCTS: [(&str, f64); 37] = [
    ("amul_darkchocolate", 50.0),
    ("balaji_aloo_sev", 20.0),
    ("balaji_ratlami_sev", 25.0),
    ("balaji_wafers_chaatchaska", 30.0),
    ("balaji_wafers_masalamasti", 30.0),
    ("balaji_wafers_simplysalted", 30.0),
    ("balaji_wafers_tomatotwist", 30.0),
    ("britannia_marie_gold", 35.0),
    ("cadbury_celebrations", 150.0),
    ("closeup", 45.0),
    ("colgate_strong_teeth", 75.0),
    ("dark_fantasy_choco_fills", 40.0),
    ("dove_shampoo", 180.0),
    ("dove_soap", 45.0),
    ("everest_chaat_masala", 55.0),
    ("everest_garam_masala", 60.0),
    ("head_and_shoulders", 190.0),
    ("krack_jack", 10.0),
    ("lakme_peach_moisturiser", 120.0),
    ("lifebuoy", 35.0),
    ("liril_bodywash", 160.0),
    ("lux", 40.0),
    ("maggi", 14.0),
    ("nescafe_coffee", 200.0),
    ("patanjali_aloevera_gel", 85.0),
    ("pears", 50.0),
    ("real_grape_juice", 90.0),
    ("rin_soap", 30.0),
    ("shreeji_dabeli_masala", 40.0),
    ("shreeji_undhiyu_masala", 45.0),
    ("surf_excel", 150.0),
    ("tata_salt", 25.0),
    ("tresemme_black", 220.0),
    ("vaseline_aloe_fresh", 95.0),
    ("veg_hakka_noodles", 45.0),
    ("vicco_vajradanti", 65.0),
    ("vim_bar", 20.0),
];

/// Derive a 9-digit barcode from a fresh UUID
fn new_barcode() -> String {
    let n = Uuid::now_v7().as_u128() % 900_000_000;
    format!("{}", 100_000_000 + n)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let store =
        HttpStore::new(&args.store_url, "current", Duration::from_millis(args.timeout_ms))?;

    let mut seeded = 0usize;
    for (name, price) in PRODUCTS {
        let product = ProductRecord {
            barcode: scancart::domain::types::Barcode(new_barcode()),
            name: name.into(),
            price,
        };

        match store.put_product(&product).await {
            Ok(()) => {
                info!(name = %product.name, barcode = %product.barcode, price = %price, "product_seeded");
                seeded += 1;
            }
            Err(e) => {
                error!(name = %name, error = %e, "product_seed_failed");
            }
        }
    }

    info!(seeded = %seeded, total = %PRODUCTS.len(), "catalog_seed_complete");
    Ok(())
}
