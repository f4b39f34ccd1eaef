//! `ragbridge`: ask questions of a remote document collection through an
//! ssh bridge.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use ragbridge_bridge::{CancellationToken, RemoteBridge};
use ragbridge_rag::{AnswerOptions, CacheCategory, GenerationOrchestrator};
use ragbridge_store::FileStateStore;
use ragbridge_vector_store::SearchFilter;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use crate::config::CliConfig;

const PARTY_FIELD: &str = "party";

#[derive(Debug, Parser)]
#[command(name = "ragbridge", version)]
#[command(about = "Answer questions from a remote document collection over an ssh bridge", long_about = None)]
struct Cli {
    /// Configuration file. Defaults to `ragbridge/config.toml` in the user config directory.
    #[arg(long, global = true, env = "RAGBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log more (`-v` for debug, `-vv` for trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask a question and print the answer with its sources
    Ask(QuestionArgs),

    /// Ask a question and print the answer as it is generated
    Stream(QuestionArgs),

    /// Check the bridge and the services behind it
    Health {
        #[arg(long)]
        json: bool,
    },

    /// List installed models, or describe one
    Models {
        /// Show details for this model instead of listing.
        #[arg(long)]
        show: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Drop cached data
    Invalidate {
        #[arg(value_enum)]
        category: CategoryArg,
    },

    /// Delete conversations idle for longer than the given age
    Prune {
        #[arg(long)]
        max_age_secs: u64,
    },
}

#[derive(Debug, Args)]
struct QuestionArgs {
    /// The question. Multiple words are joined with spaces.
    #[arg(required = true)]
    question: Vec<String>,

    /// Only search documents by this member.
    #[arg(long)]
    member: Option<String>,

    /// Only search documents from this party.
    #[arg(long)]
    party: Option<String>,

    /// Model to generate with.
    #[arg(long)]
    model: Option<String>,

    /// Continue an earlier conversation.
    #[arg(long)]
    conversation: Option<String>,

    /// Maximum number of documents to retrieve.
    #[arg(long)]
    limit: Option<usize>,

    /// Neither read nor write the response cache.
    #[arg(long)]
    no_cache: bool,

    /// Leave earlier turns out of the prompt.
    #[arg(long)]
    no_history: bool,

    #[arg(long)]
    json: bool,
}

impl QuestionArgs {
    fn question(&self) -> String {
        self.question.join(" ")
    }

    fn options(&self) -> AnswerOptions {
        let mut options = AnswerOptions::default()
            .with_cache(!self.no_cache)
            .with_history(!self.no_history);
        if let Some(id) = &self.conversation {
            options = options.with_conversation(id.as_str());
        }
        if let Some(model) = &self.model {
            options = options.with_model(model.as_str());
        }
        if let Some(limit) = self.limit {
            options = options.with_limit(limit);
        }
        options
    }

    /// Command-line filters are ANDed equality predicates.
    fn filter(&self, member_field: &str) -> Option<SearchFilter> {
        let mut predicates = Vec::new();
        if let Some(member) = &self.member {
            predicates.push(SearchFilter::equal(member_field, member.as_str()));
        }
        if let Some(party) = &self.party {
            predicates.push(SearchFilter::equal(PARTY_FIELD, party.as_str()));
        }
        match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(SearchFilter::and(predicates)),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CategoryArg {
    Existence,
    Members,
    Stats,
    Responses,
    All,
}

impl From<CategoryArg> for CacheCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Existence => CacheCategory::Existence,
            CategoryArg::Members => CacheCategory::Members,
            CategoryArg::Stats => CacheCategory::Stats,
            CategoryArg::Responses => CacheCategory::Responses,
            CategoryArg::All => CacheCategory::All,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = CliConfig::load(cli.config.as_deref())?;
    let bridge = Arc::new(RemoteBridge::new(config.bridge.clone()));
    let state_path = config.state_path();
    let state = FileStateStore::open(&state_path)
        .await
        .with_context(|| format!("failed to open state file {}", state_path.display()))?;

    let orchestrator = GenerationOrchestrator::builder()
        .with_config(config.rag.clone())
        .with_embedding_config(config.embedding.clone())
        .with_vector_store_config(config.vector_store.clone())
        .with_transport(bridge.clone())
        .with_health_check(bridge.clone())
        .with_state_store(Arc::new(state))
        .build()?;

    let result = run(cli.command, &orchestrator, &config).await;
    bridge.disconnect().await;
    result
}

async fn run(command: Command, orchestrator: &GenerationOrchestrator, config: &CliConfig) -> anyhow::Result<()> {
    match command {
        Command::Ask(args) => {
            let filter = args.filter(&config.vector_store.member_field);
            let answer = orchestrator
                .answer(&args.question(), filter.as_ref(), &args.options())
                .await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print!("{}", render::answer(&answer));
            }
        }
        Command::Stream(args) => {
            let filter = args.filter(&config.vector_store.member_field);
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling generation");
                    interrupt.cancel();
                }
            });

            let json = args.json;
            let mut on_chunk = |chunk: &str| {
                if !json {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                }
            };
            let answer = orchestrator
                .answer_streaming(&args.question(), filter.as_ref(), &args.options(), &mut on_chunk, &cancel)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!();
                print!("{}{}", render::sources(&answer.sources), render::footer(&answer));
            }
        }
        Command::Health { json } => {
            let report = orchestrator.health().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::health(&report));
            }
        }
        Command::Models { show: Some(name), json } => {
            let details = orchestrator.model_details(&name).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print!("{}", render::model_details(&details));
            }
        }
        Command::Models { show: None, json } => {
            let models = orchestrator.list_models().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&models)?);
            } else {
                print!("{}", render::models(&models));
            }
        }
        Command::Invalidate { category } => {
            orchestrator.invalidate(category.into()).await?;
            info!("Invalidated {category:?}");
        }
        Command::Prune { max_age_secs } => {
            let removed = orchestrator
                .prune_conversations(Duration::from_secs(max_age_secs))
                .await?;
            println!("Removed {removed} conversation(s)");
        }
    }
    debug!("Usage this run: {:?}", orchestrator.usage_totals());
    Ok(())
}
