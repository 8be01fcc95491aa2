use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::render;
use std::path::PathBuf;
use std::sync::Arc;
use tariff_core::classifier::{ClassifyRequest, DEFAULT_TOP_K};
use tariff_core::config;
use tariff_core::extractor::Attachment;
use tariff_core::pipeline::{ChatReply, TariffService};
use tariff_core::session::{ConversationStore, SqliteConversationStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    tracing::debug!(
        search = %cfg.search.provider,
        generation = %cfg.generation.provider,
        fusion = ?cfg.retrieval.fusion,
        "configuration loaded"
    );
    let store = Arc::new(SqliteConversationStore::open(&cfg.database.path).await?);

    if let Commands::Session { action, session } = &cli.command {
        return run_session(store.as_ref(), action, session).await;
    }

    let service = TariffService::from_config(&cfg, store)?;
    match cli.command {
        Commands::Classify {
            text,
            file,
            top_k,
            debug,
            session,
            json,
        } => {
            let mut req = ClassifyRequest {
                text,
                file: None,
                top_k,
                debug,
            };
            if let Some(path) = file {
                req.file = Some(Attachment::from_path(&path).await?);
            }
            let result = service.classify(&session, &req).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", render::render_result(&result));
            }
        }
        Commands::Followup {
            question,
            session,
            json,
        } => {
            let answer = service.followup(&session, &question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.answer);
            }
        }
        Commands::Chat {
            message,
            session,
            json,
        } => match service.chat(&session, &message).await? {
            ChatReply::Classification(result) if json => {
                println!("{}", serde_json::to_string_pretty(&result)?)
            }
            ChatReply::Classification(result) => println!("{}", render::render_result(&result)),
            ChatReply::Answer(answer) if json => {
                println!("{}", serde_json::json!({ "answer": answer }))
            }
            ChatReply::Answer(answer) => println!("{answer}"),
        },
        Commands::Search { query, top_k } => {
            let report = service.search(&query, top_k).await;
            println!("{}", render::render_report(&report));
        }
        Commands::InitIndex => {
            service.init_index().await?;
            println!("index '{}' ready", cfg.search.index);
        }
        Commands::Session { .. } => {}
    }
    Ok(())
}

async fn run_session(store: &dyn ConversationStore, action: &SessionAction, session: &str) -> Result<()> {
    match action {
        SessionAction::Show => {
            let ctx = store.load(session).await?;
            println!("{}", serde_json::to_string_pretty(&ctx)?);
        }
        SessionAction::Clear => {
            if store.clear(session).await? {
                println!("session '{session}' cleared");
            } else {
                println!("session '{session}' not found");
            }
        }
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "tariff-rag")]
#[command(about = "Evidence-grounded tariff classification", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a product description and/or a document
    Classify {
        /// Product description
        text: Option<String>,
        /// Document to extract text from (image, PDF or plain text)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Number of evidence fragments and maximum candidates
        #[arg(short, long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Attach stage diagnostics to the result
        #[arg(long)]
        debug: bool,
        /// Conversation session id
        #[arg(long, default_value = "default")]
        session: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask about the last classification of a session
    Followup {
        question: String,
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(long)]
        json: bool,
    },
    /// Free-form message: classified or answered depending on the session
    Chat {
        message: String,
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(long)]
        json: bool,
    },
    /// Show fused retrieval results without generating
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        top_k: usize,
    },
    /// Create the search index if it does not exist
    InitIndex,
    /// Inspect or reset a conversation session
    Session {
        #[command(subcommand)]
        action: SessionAction,
        #[arg(long, default_value = "default", global = true)]
        session: String,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    Show,
    Clear,
}
