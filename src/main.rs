mod cli;

use std::io::Write;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use packrat::announce::{Announce, ChannelAnnouncer, NullAnnouncer};
use packrat::config::Config;
use packrat::dao;
use packrat::db::Database;
use packrat::giphy::{profile_from_input, GiphyClient};
use packrat::sync::{HttpFetcher, Orchestrator, SyncOptions, GENERIC_FEED};
use packrat::telegram::TelegramApi;
use packrat::types::RunStatus;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let db = Database::connect(config.database_url.as_deref()).await?;
    db.run_migrations().await?;

    let http = reqwest::Client::builder().user_agent("packrat/0.1").build()?;
    let giphy = GiphyClient::new(http.clone(), config.giphy_api_key.clone());

    match cli.command {
        Commands::Sync {
            profile,
            collection,
            cap,
            yes,
        } => {
            // Ledger keys use the bare handle even when a URL was given.
            let profile = profile_from_input(&profile);
            let telegram = TelegramApi::new(http.clone(), &config.bot_token, config.owner_user_id);
            let fetcher = HttpFetcher::new(http);

            let options = SyncOptions {
                batch_cap: cap.unwrap_or(config.batch_cap),
                fetch_limit: config.fetch_limit,
                preview_seconds: config.preview_seconds,
                failure_policy: config.failure_policy,
                render_preview: config.channel_id.is_some(),
                ..SyncOptions::default()
            };

            // Honor ctrl-c between items, never mid-item.
            let cancel = options.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.store(true, Ordering::Relaxed);
                }
            });

            let orch = Orchestrator::new(&giphy, &telegram, &fetcher, db.pool(), options);
            let plan = orch.plan(&profile, collection.as_deref()).await?;

            if plan.items.is_empty() {
                println!(
                    "Collection '{}' is already fully synchronized. Nothing to do.",
                    plan.collection
                );
                return Ok(());
            }

            println!(
                "{} new items will be processed (of {} eligible, {} discovered).",
                plan.items.len(),
                plan.eligible,
                plan.discovered
            );
            if !yes && !confirm("Proceed? [y/N]: ")? {
                println!("Aborted.");
                return Ok(());
            }

            let announcer: Box<dyn Announce> = match &config.channel_id {
                Some(channel) => {
                    Box::new(ChannelAnnouncer::new(telegram.clone(), channel.clone()))
                }
                None => Box::new(NullAnnouncer),
            };

            let report = orch.execute(&plan, announcer.as_ref()).await?;
            info!(status = ?report.status, "run finished");
            println!(
                "Attempted {}, succeeded {}, skipped {}.",
                report.attempted, report.succeeded, report.skipped
            );
            if let Some(name) = &report.pack_short_name {
                println!("Pack: https://t.me/addstickers/{name}");
            }
            match report.status {
                Some(RunStatus::FullySynced) => println!("Fully synchronized."),
                Some(RunStatus::PartiallySynced) => {
                    println!("Partially synchronized; skipped items stay eligible for next run.")
                }
                Some(RunStatus::Aborted) => println!("Aborted by user."),
                _ => {}
            }
        }
        Commands::Collections { profile } => {
            let collections = giphy.list_collections(&profile).await?;
            if collections.is_empty() {
                println!("No collections discovered; the profile feed can still be mirrored.");
            } else {
                for (i, name) in collections.iter().enumerate() {
                    println!("{:3}. {name}", i + 1);
                }
            }
        }
        Commands::Status {
            profile,
            collection,
        } => {
            let source = profile_from_input(&profile);
            let collection = collection.as_deref().unwrap_or(GENERIC_FEED);
            let count = dao::processed_count(db.pool(), &source, collection).await?;
            println!("{count} items recorded for {source}/{collection}");
            if let Some(pack) = dao::get_pack(db.pool(), &source, collection).await? {
                println!("Pack: {} (https://t.me/addstickers/{})", pack.title, pack.short_name);
            }
        }
    }

    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("y"))
}
