use std::path::PathBuf;
use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use queuebot::{AppError, EntryContext, QueueConfig, QueueManager};

#[derive(Parser)]
#[command(name = "queuebot", version, about = "Download queue for a media-playback bot")]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Routing context the queue belongs to
    #[arg(long, global = true, default_value = "default")]
    context: String,

    /// Requesting actor recorded with added entries
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve and queue a single item
    Add { source_ref: String },
    /// Queue every item of a collection
    Import {
        collection_ref: String,
        /// Validate each member with its own lookup
        #[arg(long)]
        individually: bool,
    },
    /// Pop the head and wait for its download
    Next {
        #[arg(long)]
        no_prefetch: bool,
    },
    /// Show the queue with wait estimates
    List,
    Shuffle {
        #[arg(long)]
        seed: Option<u64>,
    },
    Clear,
    /// Move legacy play records to counters
    Migrate,
    /// Queue a previously played item, weighted by play count
    Surprise,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => QueueConfig::load_from(path),
        None => QueueConfig::load(),
    }
    .context("Failed to load configuration")?;
    info!("Configuration loaded, downloads go to {:?}", config.download_dir);

    let manager = QueueManager::new(&config).await?;
    let playlist = manager.get_playlist(&cli.context).await?;
    let context = EntryContext {
        actor_id: cli.actor.clone(),
        channel_id: Some(cli.context.clone()),
        ..EntryContext::default()
    };

    match cli.command {
        Command::Add { source_ref } => match playlist.add_entry(&source_ref, context.clone()).await {
            Ok((entry, position)) => {
                let wait = playlist.estimate_wait_until(position, None).await;
                println!("Enqueued {} at position {} (~{}s)", entry.title(), position, wait.as_secs());
            }
            Err(AppError::UnsupportedEntryType {
                collection_ref: Some(collection_ref),
                ..
            }) => {
                println!("That is a playlist, importing {}", collection_ref);
                let (entries, position) = playlist.import_from(&collection_ref, context).await?;
                println!("Enqueued {} entries starting at position {}", entries.len(), position);
            }
            Err(e) => return Err(e.into()),
        },
        Command::Import {
            collection_ref,
            individually,
        } => {
            if individually {
                let entries = playlist.import_individually(&collection_ref, context).await?;
                println!("Enqueued {} entries", entries.len());
            } else {
                let (entries, position) = playlist.import_from(&collection_ref, context).await?;
                println!("Enqueued {} entries starting at position {}", entries.len(), position);
            }
        }
        Command::Next { no_prefetch } => match playlist.next_entry(!no_prefetch).await? {
            Some(entry) => println!(
                "{} -> {}",
                entry.title(),
                entry.local_artifact_path().unwrap_or_default().display()
            ),
            None => println!("Queue is empty"),
        },
        Command::List => {
            for (index, entry) in playlist.entries().await.iter().enumerate() {
                let wait = playlist.estimate_wait_until(index + 1, None).await;
                println!(
                    "{:>3}. {} [{}s] ~{}s {:?}",
                    index + 1,
                    entry.title(),
                    entry.duration_secs() as u64,
                    wait.as_secs(),
                    entry.download_state()
                );
            }
        }
        Command::Shuffle { seed } => {
            playlist.shuffle(seed).await?;
            println!("Shuffled {} entries", playlist.len().await);
        }
        Command::Clear => {
            playlist.clear(None).await?;
            println!("Cleared");
        }
        Command::Migrate => {
            let migrated = manager.play_counts().migrate().await?;
            println!("Migrated {} references", migrated);
        }
        Command::Surprise => {
            let pick = manager.play_counts().weighted_pick(&mut StdRng::from_entropy()).await?;
            match pick {
                Some(source_ref) => {
                    let (entry, position) = playlist.add_entry(&source_ref, context).await?;
                    println!("Enqueued {} at position {}", entry.title(), position);
                }
                None => println!("Nothing has been played yet"),
            }
        }
    }

    Ok(())
}
