use mailq::codec;
use mailq::config::Config;
use mailq::db::Database;
use mailq::store::JobStore;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <job_id>", args[0]);
        eprintln!("Prints the stored row and its decoded payload.");
        std::process::exit(1);
    }

    let id: i64 = args[1]
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid job id {}: {}", args[1], e))?;

    let config = Config::load()?;
    let db = Database::new(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
    db.run_migrations().await?;

    let Some(entry) = db.get(id).await? else {
        println!("No job with id {}", id);
        return Ok(());
    };

    println!("Job #{}", entry.id);
    println!("Status: {} ({})", entry.status, entry.status.label());
    println!("Priority: {}", entry.priority);
    println!("Inserted: {} by {}", entry.insert_date, entry.insert_user);
    match entry.send_date {
        Some(date) => println!("Last attempt: {}", date),
        None => println!("Last attempt: (never)"),
    }
    println!("Attempts: {}", entry.attempts);
    println!(
        "--------------------------------------------------------------------------------"
    );
    println!("PAYLOAD (Raw):");
    println!("{}", entry.payload);
    println!(
        "--------------------------------------------------------------------------------"
    );
    println!("PAYLOAD (Decoded):");
    match codec::decode(&entry.payload) {
        Ok(payload) => println!("{:#?}", payload),
        Err(e) => println!("(unreadable: {})", e),
    }
    println!(
        "--------------------------------------------------------------------------------"
    );

    Ok(())
}
