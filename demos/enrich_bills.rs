use dotenv::dotenv;
use moedelo_sync::{enrich_latest_bills, sync_bills, ClientConfig, MoeDeloClient};

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    println!("🚀 Exporting sales bills from Moe Delo...");

    let config = ClientConfig::from_env()?;
    let client = MoeDeloClient::new(&config)?;

    let bills = sync_bills(&config, &client)?;
    println!(
        "✅ {} bills exported to {}",
        bills.len(),
        config.bills_dir().display()
    );
    if bills.is_empty() {
        return Ok(());
    }

    println!("\n🔗 Fetching bill details and counterparties...");
    let enriched = enrich_latest_bills(&config, &client)?;
    println!("✅ {}", enriched.summary);

    for record in enriched.records.iter().take(10) {
        let bill = &record.record;
        let status = bill.status.map(|s| s.label()).unwrap_or_default();
        let who = record
            .counterparty_name()
            .unwrap_or_else(|| record.failure_reason());
        println!(
            "   #{} {} {:>12} {:<14} {}",
            bill.number.as_deref().unwrap_or("?"),
            bill.doc_date.format("%Y-%m-%d"),
            bill.sum.map(|s| s.to_string()).unwrap_or_default(),
            status,
            who
        );
    }

    Ok(())
}
