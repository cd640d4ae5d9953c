use chrono::Months;
use dotenv::dotenv;
use moedelo_sync::{
    enrich_bank_statement, sync_bank_statement, ClientConfig, FileSnapshotStore, MoeDeloClient,
    SnapshotStore,
};

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    println!("🚀 Syncing bank statement from Moe Delo...");

    let config = ClientConfig::from_env()?;
    let client = MoeDeloClient::new(&config)?;

    let store = FileSnapshotStore::new(&config.storage_dir);
    match store.metadata()? {
        Some(meta) => println!(
            "📂 Local snapshot: {} operations, {} .. {}, updated {}",
            meta.operation_count,
            meta.first_operation_date,
            meta.last_operation_date,
            meta.last_updated
        ),
        None => println!("📂 No local snapshot yet, fetching the full year"),
    }

    let operations = sync_bank_statement(&config, &client, Months::new(12))?;
    println!("✅ {} operations in the last 12 months", operations.len());

    for op in operations.iter().rev().take(5) {
        let contractor = op
            .contractor
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .unwrap_or("-");
        println!("   {} {:>14} {}", op.date.format("%Y-%m-%d"), op.sum, contractor);
    }

    println!("\n🔗 Resolving counterparties...");
    let enriched = enrich_bank_statement(&config, &client)?;
    println!("✅ {}", enriched.summary);

    for record in enriched.records.iter().filter(|r| !r.is_resolved()).take(10) {
        println!("   ⚠️  operation {}: {}", record.record.id, record.failure_reason());
    }

    Ok(())
}
