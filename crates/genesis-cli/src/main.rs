//! Genesis CLI
//!
//! Usage:
//!   genesis chat            - interactive session
//!   genesis ask <text>      - one-shot question
//!   genesis memory list     - inspect stored memories
//!
//! Needs OPENROUTER_API_KEY in the environment. State lives in ~/.genesis/.

use std::io::{BufRead, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use genesis_core::{
    builtin_registry, Kernel, KernelEvent, ModelConfig, OpenRouterModel, PermissionGate, Role,
    SensitiveActions, Turn,
};
use genesis_memory::{SqliteContextStore, SqliteSessionStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "genesis")]
#[command(version)]
#[command(about = "Voice-first agent orchestration kernel", long_about = None)]
struct Cli {
    /// Session id; each id is an independent conversation thread
    #[arg(long, global = true, default_value = "default")]
    session: String,

    /// Override the model id
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session
    Chat,

    /// Ask a single question and exit
    Ask {
        /// The request text
        text: Vec<String>,
    },

    /// Inspect persistent memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List recent memory records
    List {
        /// Maximum records to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat => {
            let kernel = build_kernel(cli.model)?;
            println!("⚡ Genesis ready. Type 'exit' to leave.");

            let stdin = std::io::stdin();
            loop {
                print!("you> ");
                std::io::stdout().flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "exit" || input == "quit" {
                    break;
                }

                kernel
                    .advance_with_events(&cli.session, input, render_event)
                    .await;
            }
        }

        Commands::Ask { text } => {
            let request = text.join(" ");
            if request.is_empty() {
                anyhow::bail!("nothing to ask");
            }
            let kernel = build_kernel(cli.model)?;
            let turns = kernel.advance(&cli.session, &request).await;
            for turn in turns_to_show(&turns) {
                println!("{}", turn.content);
            }
        }

        Commands::Memory { action } => match action {
            MemoryAction::List { limit } => {
                let store =
                    SqliteContextStore::open_default().map_err(anyhow::Error::msg)?;
                let rows = store.list_recent(limit).map_err(anyhow::Error::msg)?;
                if rows.is_empty() {
                    println!("No memories stored yet.");
                }
                for row in rows {
                    println!("[{}] {} {}", row.created_at, row.content, row.metadata);
                }
            }
        },
    }

    Ok(())
}

/// Wire the long-lived kernel: one engine handle per process, stores opened
/// once and injected.
fn build_kernel(model_override: Option<String>) -> anyhow::Result<Kernel> {
    let mut config = ModelConfig::from_env()?;
    if let Some(model) = model_override {
        config = config.with_model(model);
    }

    let http_client = reqwest::Client::new();
    let context: Arc<SqliteContextStore> =
        Arc::new(SqliteContextStore::open_default().map_err(anyhow::Error::msg)?);
    let sessions = Arc::new(SqliteSessionStore::open_default().map_err(anyhow::Error::msg)?);

    let tools = builtin_registry(context.clone(), http_client.clone());
    let model = Arc::new(OpenRouterModel::new(config, http_client));

    Ok(Kernel::new(
        model,
        tools,
        PermissionGate::new(SensitiveActions::default()),
        context,
        sessions,
    ))
}

/// Render kernel progress the way the UI stream consumed it: status lines
/// for tool activity, a visible prompt for permission requests, plain text
/// for the answer.
fn render_event(event: KernelEvent) {
    match event {
        KernelEvent::Thinking => println!("🧠 thinking..."),
        KernelEvent::ToolCall { name, preview } => println!("🛠️  {} · {}", name, preview),
        KernelEvent::ToolResult { name: _, preview } => println!("   ↳ {}", preview),
        KernelEvent::PermissionRequest { message } => println!("\n{}\n", message),
        KernelEvent::Response(text) => println!("\ngenesis> {}\n", text),
    }
}

/// Turns worth printing in one-shot mode: the answer and any
/// authorization/cancellation directives, not intermediate tool chatter.
fn turns_to_show(turns: &[Turn]) -> Vec<&Turn> {
    turns
        .iter()
        .filter(|t| match t.role {
            Role::Assistant => !t.content.is_empty(),
            Role::SystemDirective => true,
            _ => false,
        })
        .collect()
}
