use anyhow::{Context, Result, bail};
use mailq::config::Config;
use mailq::db::Database;
use mailq::transport::SmtpTransport;
use mailq::{MailQueue, Priority, Status, codec};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: mailq [--config PATH] [--debug] <command>

Commands:
  enqueue <payload.json> [--priority high|medium|low] [--user ID]
  dispatch [pending|refused]
  report
  recover";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let debug_logging = take_flag(&mut args, "--debug");
    init_tracing(debug_logging);

    let config = match take_option(&mut args, "--config")? {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let command = args.remove(0);

    let db = Database::new(&config.database.url).await?;
    db.run_migrations().await?;
    let transport = SmtpTransport::from_config(&config.smtp)?;
    let mut queue = MailQueue::new(db, transport, &config);

    match command.as_str() {
        "enqueue" => {
            let priority = match take_option(&mut args, "--priority")? {
                Some(p) => p.parse::<Priority>().map_err(anyhow::Error::msg)?,
                None => Priority::default(),
            };
            if let Some(user) = take_option(&mut args, "--user")? {
                queue = queue.insert_user(user);
            }
            let Some(path) = args.first() else {
                bail!("enqueue needs a payload file\n\n{USAGE}");
            };

            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read payload file {path}"))?;
            let payload = codec::decode(&content)?;

            let receipt = queue.enqueue(&payload, priority).await;
            println!("[{}] {}", receipt.error_code, receipt.message);
            if let Some(id) = receipt.id {
                println!("job id: {id}");
            }
            if !receipt.is_ok() {
                std::process::exit(1);
            }
        }
        "dispatch" => {
            let status = match args.first() {
                Some(s) => s.parse::<Status>().map_err(anyhow::Error::msg)?,
                None => Status::Pending,
            };
            if !status.is_dispatchable() {
                bail!("only pending or refused jobs can be dispatched, got {status}");
            }

            let outcomes = queue.dispatch(status).await?;
            for outcome in &outcomes {
                let mark = if outcome.succeeded { "ok" } else { "failed" };
                println!("#{} {mark}: {}", outcome.job_id, outcome.message);
            }
            let delivered = outcomes.iter().filter(|o| o.succeeded).count();
            println!(
                "{delivered} delivered, {} failed",
                outcomes.len() - delivered
            );
        }
        "report" => {
            let lines = queue.report().await?;
            if lines.is_empty() {
                println!("queue is empty");
            }
            for line in lines {
                println!("{:>8}  {}", line.count, line.label);
            }
        }
        "recover" => {
            let moved = queue.recover_in_flight().await?;
            println!("{moved} in-flight job(s) moved to refused");
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_tracing(debug_logging: bool) {
    let default_filter = if debug_logging {
        "info,mailq=debug"
    } else {
        "warn,mailq=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{name} needs a value");
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}
