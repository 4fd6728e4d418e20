use std::path::PathBuf;

use clap::{Parser, Subcommand};

use grocylink::error::SyncError;
use grocylink::service::Service;
use grocylink::store::DEFAULT_LOG_LIMIT;
use grocylink::utils::print_sync_entries;

#[derive(Parser)]
#[command(name = "grocylink")]
#[command(about = "Stock alerts and CalDAV sync for Grocy")]
struct Cli {
    /// Where settings, channels and the sync map are stored
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic stock checks and calendar syncs until interrupted
    Daemon,
    /// Sync with the calendar once, even if the periodic sync is disabled
    SyncNow,
    /// Check the stock and send notifications once
    CheckNow,
    /// List the calendars of the CalDAV server
    Calendars,
    TestCaldav,
    TestGrocy,
    /// Send a test message on a notification channel
    TestChannel {
        id: i64,
    },
    /// Show the links between Grocy and the calendar
    Map,
    /// Forget every link between Grocy and the calendar, so that the next sync is a full one
    ClearMap,
    /// Show the notification log
    Log {
        #[arg(short, long, default_value_t = DEFAULT_LOG_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), SyncError> {
    let service = Service::open(&cli.data_dir)?;

    match cli.command {
        Commands::Daemon => {
            service.reschedule()?;
            log::info!("Running. Press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            service.shutdown();
        },
        Commands::SyncNow => {
            let stats = service.sync_now().await?;
            println!("Tasks pushed: {}", stats.tasks_synced);
            println!("Chores pushed: {}", stats.chores_synced);
            println!("Changes applied to Grocy: {}", stats.calendar_to_inventory);
            for error in &stats.errors {
                println!("  ! {}", error);
            }
        },
        Commands::CheckNow => {
            let alerts = service.run_stock_check().await?;
            println!("{} alert(s)", alerts.len());
            for alert in alerts {
                println!("  [{}] {} - {}", alert.kind.as_str(), alert.product_name, alert.detail);
            }
        },
        Commands::Calendars => {
            for name in service.list_calendars().await? {
                println!("  {}", name);
            }
        },
        Commands::TestCaldav => {
            let (ok, message) = service.test_caldav().await?;
            println!("{} {}", if ok { "OK" } else { "FAILED" }, message);
        },
        Commands::TestGrocy => {
            let (ok, message) = service.test_grocy().await?;
            println!("{} {}", if ok { "OK" } else { "FAILED" }, message);
        },
        Commands::TestChannel { id } => {
            service.test_channel(id).await?;
            println!("Test message sent");
        },
        Commands::Map => {
            let status = service.sync_status()?;
            println!("{} task(s), {} chore(s) linked", status.tasks_synced, status.chores_synced);
            if let Some(last_sync) = status.last_sync {
                println!("Last sync: {}", last_sync.format("%Y-%m-%d %H:%M:%S"));
            }
            let entries = service.sync_entries()?;
            print_sync_entries(&entries.iter().collect::<Vec<_>>());
        },
        Commands::ClearMap => {
            service.clear_sync_map()?;
            println!("Sync map cleared");
        },
        Commands::Log { limit } => {
            for entry in service.store().log(limit)? {
                println!("{}  {}  {:<10} {:<12} {}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    if entry.success { "✓" } else { "✗" },
                    entry.notification_type,
                    entry.channel_name,
                    entry.product_name.as_deref().unwrap_or("-"),
                    entry.message,
                );
            }
        },
    }
    Ok(())
}
