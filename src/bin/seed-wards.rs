//! Idempotent ward-registry provisioning. Seeds wards 1..=32 with bilingual
//! names and zeroed customer counts; existing wards are left untouched.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use wardcast_api::db;
use wardcast_api::models::ward::{Ward, WARD_NUMBER_MAX, WARD_NUMBER_MIN};
use wardcast_api::models::LocalizedText;
use wardcast_api::store::postgres::PgStore;
use wardcast_api::store::{collections, DocWrite, DocumentStore, Query};

#[derive(Parser)]
#[command(name = "seed-wards", about = "Provision the ward registry (idempotent)")]
struct Args {
    /// Seed only these ward numbers instead of the full 1..=32 range.
    #[arg(long, value_delimiter = ',')]
    only: Option<Vec<i64>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Missing required env var: DATABASE_URL"))?;

    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(PgStore::new(pool));

    let numbers: Vec<i64> = match args.only {
        Some(numbers) => numbers,
        None => (WARD_NUMBER_MIN..=WARD_NUMBER_MAX).collect(),
    };

    let mut created = 0;
    for number in numbers {
        if !(WARD_NUMBER_MIN..=WARD_NUMBER_MAX).contains(&number) {
            anyhow::bail!("ward number {number} out of range");
        }
        let existing = store
            .query(
                &Query::collection(collections::WARDS)
                    .filter("number", serde_json::json!(number))
                    .limit(1),
            )
            .await?;
        if !existing.is_empty() {
            continue;
        }

        let ward = Ward {
            id: Uuid::new_v4(),
            number,
            name: LocalizedText::new(format!("Ward {number}"), Some(format!("Quartier {number}"))),
            customer_count: 0,
            is_active: true,
        };
        store
            .batch_write(vec![DocWrite::create(Ward::doc_key(ward.id), &ward)?])
            .await?;
        created += 1;
        info!("Seeded ward {number}");
    }

    info!("Ward registry ready ({created} created)");
    Ok(())
}
