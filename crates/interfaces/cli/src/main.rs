use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use quill_config::AppConfig;
use quill_engine::{AgentMode, ModeContext, ModeIo, ModeRouter};
use quill_llm::{ChatMessage, CompletionClient, OpenAiCompatClient};
use quill_tools::{
    CalculatorTool, ColorTokensTool, CreateDocumentTool, DocumentSink, HumanInputTool,
    OperatorChannel, ToolRegistry, WebSearchTool, WebsiteBrowserTool,
};

#[derive(Debug, Parser)]
#[command(name = "quill", version, about = "Agent orchestration engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "quill.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one message through the selected agent mode.
    Ask {
        message: String,
        /// Agent mode: chat, document, knowledge, custom, or agent.
        #[arg(long)]
        mode: Option<String>,
        /// File whose contents act as the current document.
        #[arg(long)]
        document: Option<PathBuf>,
        /// Document-mode task description.
        #[arg(long)]
        task: Option<String>,
        /// Custom system note replacing the default persona.
        #[arg(long)]
        system_note: Option<String>,
    },
    /// List the registered agent-loop tools.
    Tools,
}

/// Answers human-input questions from the terminal.
struct StdinOperator;

#[async_trait]
impl OperatorChannel for StdinOperator {
    async fn ask(&self, question: &str) -> Option<String> {
        println!("\n[agent asks] {question}");
        print!("> ");
        std::io::stdout().flush().ok()?;

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        reader.read_line(&mut line).await.ok()?;
        let answer = line.trim().to_string();
        if answer.is_empty() { None } else { Some(answer) }
    }
}

/// Writes created documents into a local directory, one markdown file each.
struct DirectorySink {
    dir: PathBuf,
}

#[async_trait]
impl DocumentSink for DirectorySink {
    async fn create_document(&self, title: &str, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let slug: String = title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = self.dir.join(format!("{stamp}-{slug}.md"));
        tokio::fs::write(&path, format!("# {title}\n\n{content}\n")).await?;
        println!("[document created] {}", path.display());
        Ok(())
    }
}

fn build_registry(
    config: &AppConfig,
    client: Arc<dyn CompletionClient>,
    sink: Arc<dyn DocumentSink>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(Arc::new(CalculatorTool));
    registry.register(Arc::new(WebSearchTool {
        max_results: config.tools.search_max_results,
    }));
    if let Some(proxy_url) = config.tools.proxy_url() {
        registry.register(Arc::new(WebsiteBrowserTool::new(proxy_url)));
    }
    registry.register(Arc::new(HumanInputTool::new(
        Arc::new(StdinOperator),
        Duration::from_secs(config.agent.human_input_timeout_secs),
    )));
    registry.register(Arc::new(CreateDocumentTool::new(sink.clone())));
    registry.register(Arc::new(ColorTokensTool::new(client, sink)));
    registry
}

async fn run_ask(
    config: &AppConfig,
    message: &str,
    mode: Option<&str>,
    document: Option<&Path>,
    task: Option<String>,
    system_note: Option<String>,
) -> Result<()> {
    let provider = &config.provider;
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiCompatClient::new(
        provider.base_url(),
        provider.api_key(),
        provider.model.clone(),
        provider.temperature,
        Duration::from_secs(provider.request_timeout_secs),
    )?);

    let sink: Arc<dyn DocumentSink> = Arc::new(DirectorySink {
        dir: PathBuf::from("documents"),
    });
    let registry = build_registry(config, client.clone(), sink.clone());
    let router = ModeRouter::new(client, registry, None, sink, config);

    let mode: AgentMode = mode
        .unwrap_or(config.agent.default_mode.as_str())
        .parse()
        .context("invalid --mode")?;

    let current_document = match document {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading document {}", path.display()))?,
        None => String::new(),
    };

    let ctx = ModeContext {
        user_name: config.agent.user_name.clone(),
        user_location: config.agent.user_location.clone(),
        system_note,
        chat_history: Vec::<ChatMessage>::new(),
        current_document,
        task,
        highlighted: None,
        surface_retrieval: config.knowledge.surface_retrieval,
        knowledge_search: config.custom.include_knowledge_search,
    };

    let (token_tx, mut token_rx) = tokio::sync::mpsc::channel::<String>(64);
    let printer = tokio::spawn(async move {
        let mut streamed = String::new();
        while let Some(token) = token_rx.recv().await {
            print!("{token}");
            std::io::stdout().flush().ok();
            streamed.push_str(&token);
        }
        streamed
    });

    let io = ModeIo {
        token_tx: Some(token_tx),
        ..ModeIo::default()
    };
    let answer = router.route(mode, message, &ctx, &io).await;
    drop(io);

    let streamed = printer.await.unwrap_or_default();
    if streamed != answer.response {
        if !streamed.is_empty() {
            println!();
        }
        println!("{}", answer.response);
    } else {
        println!();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Ask { message, mode, document, task, system_note } => {
            run_ask(
                &config,
                &message,
                mode.as_deref(),
                document.as_deref(),
                task,
                system_note,
            )
            .await?;
        }
        Commands::Tools => {
            let client: Arc<dyn CompletionClient> = Arc::new(OpenAiCompatClient::new(
                config.provider.base_url(),
                config.provider.api_key(),
                config.provider.model.clone(),
                config.provider.temperature,
                Duration::from_secs(config.provider.request_timeout_secs),
            )?);
            let sink: Arc<dyn DocumentSink> = Arc::new(DirectorySink {
                dir: PathBuf::from("documents"),
            });
            let registry = build_registry(&config, client, sink);
            println!("{}", registry.catalog());
        }
    }

    Ok(())
}
