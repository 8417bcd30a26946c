// ============================================================================
// travelverse - CLI for the TravelVerse agent core
// ============================================================================
// Usage:
//   travelverse chat --user U [--message M] [--trip JSON]
//                                             Chat (one message or interactive)
//   travelverse multi-turn --user U MSG...    Answer several messages at once
//   travelverse recommend --user U            Personalized recommendations
//   travelverse insights --user U             Memory insights for a user
//   travelverse search --user U KEYWORD       Search a user's memory
//   travelverse export --user U               Export a user's memory as JSON
//   travelverse clear --user U                Forget a user
//   travelverse backup                        Snapshot every user's memory
//   travelverse restore FILE                  Restore from a snapshot
//   travelverse health                        Probe completion API and storage
//   travelverse stats                         Aggregate memory statistics
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use travelverse_core::{
    AgentConfig, ChatCompletionClient, ConversationStateTracker, MemoryDb, MemoryManager,
    TravelAgent,
};

/// Log filter used when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "travelverse_core=info";

/// TravelVerse agent CLI
#[derive(Parser)]
#[command(name = "travelverse", version, about = "Talk to and manage the TravelVerse travel agent")]
struct Cli {
    /// Path to the database file (default: ~/.travelverse/memory.redb)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message, or chat interactively when --message is omitted
    Chat {
        #[arg(long)]
        user: String,

        #[arg(long)]
        message: Option<String>,

        /// Current trip as a JSON object, passed to the pipelines
        #[arg(long)]
        trip: Option<String>,
    },

    /// Answer a batch of messages together, with a flow analysis
    MultiTurn {
        #[arg(long)]
        user: String,

        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Personalized recommendations from the user's history
    Recommend {
        #[arg(long)]
        user: String,
    },

    /// Totals, favorite destinations, common topics and recent activity
    Insights {
        #[arg(long)]
        user: String,
    },

    /// Case-insensitive search over messages and trip destinations
    Search {
        #[arg(long)]
        user: String,

        keyword: String,
    },

    /// Export a user's memory as JSON
    Export {
        #[arg(long)]
        user: String,
    },

    /// Delete a user's memory
    Clear {
        #[arg(long)]
        user: String,
    },

    /// Write a snapshot of every user's memory to the backup directory
    Backup,

    /// Replace memory for every user found in a snapshot
    Restore {
        file: PathBuf,
    },

    /// Check the completion API and the memory database
    Health,

    /// Aggregate statistics across all users
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::from_env();
    if let Some(path) = cli.db_path {
        config.db_path = Some(path);
    }

    let db = Arc::new(MemoryDb::open(config.db_path.as_deref())?);
    let backup_dir = config.resolve_backup_dir(db.path());
    let memory = Arc::new(MemoryManager::new(db, backup_dir));

    match cli.command {
        Commands::Chat { user, message, trip } => {
            let trip = trip
                .map(|t| serde_json::from_str::<serde_json::Value>(&t).context("--trip must be valid JSON"))
                .transpose()?;
            cmd_chat(&build_agent(&config, memory)?, &user, message, trip).await
        }
        Commands::MultiTurn { user, messages } => {
            print_json(&build_agent(&config, memory)?.handle_multi_turn_conversation(&user, &messages).await)
        }
        Commands::Recommend { user } => cmd_recommend(&build_agent(&config, memory)?, &user).await,
        Commands::Insights { user } => print_json(&memory.get_memory_insights(&user).await),
        Commands::Search { user, keyword } => cmd_search(&memory, &user, &keyword).await,
        Commands::Export { user } => print_json(&memory.export_user_memory(&user).await),
        Commands::Clear { user } => cmd_clear(&memory, &user).await,
        Commands::Backup => cmd_backup(&memory).await,
        Commands::Restore { file } => cmd_restore(&memory, &file).await,
        Commands::Health => print_json(&build_agent(&config, memory)?.health_check().await),
        Commands::Stats => print_json(&memory.get_memory_stats().await),
    }
}

/// RUST_LOG when set and valid, otherwise the default filter
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn build_agent(config: &AgentConfig, memory: Arc<MemoryManager>) -> Result<TravelAgent> {
    let api_key = config
        .api_key
        .clone()
        .context("No API key: set TRAVELVERSE_API_KEY or OPENAI_API_KEY")?;
    let client = ChatCompletionClient::new(api_key)
        .with_base_url(config.base_url.clone())
        .with_model(config.model.clone());
    debug!("Using model {} at {}", config.model, config.base_url);

    Ok(TravelAgent::from_config(
        config,
        memory,
        Arc::new(ConversationStateTracker::new()),
        Arc::new(client),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_chat(
    agent: &TravelAgent,
    user: &str,
    message: Option<String>,
    trip: Option<serde_json::Value>,
) -> Result<()> {
    if let Some(message) = message {
        let envelope = agent.process_message(user, &message, trip).await;
        return print_json(&envelope);
    }

    println!("=== TravelVerse chat as '{}' (empty line or Ctrl-D to quit) ===", user);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let envelope = agent.process_message(user, line, trip.clone()).await;
        println!("[{}] {}\n", envelope.kind, envelope.content);
    }

    if let Some(state) = agent.get_conversation_state(user).await {
        println!(
            "Session ended (last intent: {}, stage: {})",
            state.current_intent.map(|i| i.to_string()).unwrap_or_else(|| "-".into()),
            state.conversation_stage
        );
    }
    Ok(())
}

async fn cmd_recommend(agent: &TravelAgent, user: &str) -> Result<()> {
    let envelope = agent.generate_personalized_recommendations(user).await;
    if envelope.is_error() {
        print_json(&envelope)
    } else {
        println!("{}", envelope.content);
        Ok(())
    }
}

async fn cmd_search(memory: &MemoryManager, user: &str, keyword: &str) -> Result<()> {
    let hits = memory.search_memories(user, keyword).await;
    if hits.is_empty() {
        println!("No matches for '{}'.", keyword);
        return Ok(());
    }
    print_json(&hits)
}

async fn cmd_clear(memory: &MemoryManager, user: &str) -> Result<()> {
    memory.clear_user_memory(user).await;
    println!("Cleared memory for user '{}'", user);
    Ok(())
}

async fn cmd_backup(memory: &MemoryManager) -> Result<()> {
    let path = memory.backup_memories().await?;
    println!("Backup written to {}", path.display());
    Ok(())
}

async fn cmd_restore(memory: &MemoryManager, file: &std::path::Path) -> Result<()> {
    let restored = memory.restore_memories(file).await?;
    println!(
        "Restored {} users from {} at {}",
        restored,
        file.display(),
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_default_filter() {
        assert_eq!(
            log_filter(Some("travelverse_core=debug".into())).to_string(),
            "travelverse_core=debug"
        );
    }

    #[test]
    fn test_default_filter_when_rust_log_unset() {
        assert_eq!(log_filter(None).to_string(), DEFAULT_LOG_FILTER);
        assert_eq!(log_filter(Some("  ".into())).to_string(), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_multi_turn_takes_several_messages() {
        let cli = Cli::parse_from(["travelverse", "multi-turn", "--user", "u1", "hi", "where to?"]);
        match cli.command {
            Commands::MultiTurn { user, messages } => {
                assert_eq!(user, "u1");
                assert_eq!(messages, vec!["hi".to_string(), "where to?".to_string()]);
            }
            _ => panic!("expected multi-turn"),
        }
    }
}
