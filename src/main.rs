use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use bavard::api::{CompletionOptions, ModelClient};
use bavard::core::chat::{Chat, ChatObserver};
use bavard::core::config::{Config, McpServerConfig};
use bavard::core::docs::DocChat;
use bavard::error::AgentError;
use bavard::logging;
use bavard::mcp::{McpSession, SessionRegistry};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Parser)]
#[command(name = "bavard")]
#[command(about = "A terminal chat agent that lets LLMs call tools exposed by MCP stdio servers")]
#[command(long_about = "Bavard connects an Anthropic-compatible model endpoint to MCP stdio \
servers and runs an agentic chat loop: the model sees every server's tools, and tool calls \
are dispatched to the server that owns them.\n\n\
Environment Variables:\n\
  ANTHROPIC_API_KEY   API key for the model endpoint (required)\n\
  ANTHROPIC_BASE_URL  Custom endpoint base URL (optional)\n\
  BAVARD_MODEL        Model to chat with (optional)\n\n\
The first configured server doubles as the document session: it serves the \
docs:// resources behind @mentions and the prompts behind /commands.")]
struct Args {
    #[arg(short, long, env = "BAVARD_MODEL", help = "Model to chat with")]
    model: Option<String>,

    #[arg(
        long,
        env = "ANTHROPIC_BASE_URL",
        default_value = DEFAULT_BASE_URL,
        help = "Model endpoint base URL"
    )]
    base_url: String,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, help = "API key")]
    api_key: String,

    #[arg(long, help = "Config file to load instead of the default location")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "logs", help = "Directory for diagnostic logs")]
    log_dir: PathBuf,

    #[arg(long, help = "Maximum tool rounds per user turn")]
    max_tool_turns: Option<usize>,

    /// Extra MCP servers to spawn, given as full command lines, e.g.
    /// "uv run mcp_server.py". These run after the configured servers.
    #[arg(value_name = "SERVER_COMMAND")]
    servers: Vec<String>,
}

/// Prints loop progress to the terminal while a turn is running.
struct ConsoleObserver;

impl ChatObserver for ConsoleObserver {
    fn on_intermediate_text(&self, text: &str) {
        println!("{text}\n");
    }

    fn on_tool_dispatch(&self, tool_names: &[String]) {
        println!("[calling: {}]", tool_names.join(", "));
    }
}

fn cli_server_config(index: usize, command_line: &str) -> Option<McpServerConfig> {
    let mut words = command_line.split_whitespace();
    let command = words.next()?.to_string();
    let args: Vec<String> = words.map(str::to_string).collect();
    Some(McpServerConfig {
        id: format!("cli_{index}_{command}"),
        command,
        args: (!args.is_empty()).then_some(args),
        env: None,
        enabled: None,
    })
}

async fn connect_servers(
    configs: &[McpServerConfig],
) -> Result<SessionRegistry, AgentError> {
    let mut registry = SessionRegistry::new();
    for config in configs {
        let session = match McpSession::connect(config).await {
            Ok(session) => session,
            Err(err) => {
                // A half-started roster would silently lose tools; tear down
                // what already connected and bail.
                registry.close_all().await;
                return Err(err);
            }
        };
        info!(server_id = %config.id, "Connected MCP server");
        registry.register(session);
    }
    Ok(registry)
}

async fn repl(chat: &mut DocChat) -> Result<(), Box<dyn Error>> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "quit" || query == "exit" {
            break;
        }

        match chat.run(query).await {
            Ok(answer) => println!("{answer}\n"),
            Err(err) => {
                error!(error = %err, "Turn failed");
                eprintln!("Error: {err}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let log_path = logging::init(&args.log_dir)?;
    info!(model = ?args.model, "Starting bavard");

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let mut server_configs: Vec<McpServerConfig> =
        config.enabled_servers().into_iter().cloned().collect();
    server_configs.extend(
        args.servers
            .iter()
            .enumerate()
            .filter_map(|(index, command_line)| cli_server_config(index, command_line)),
    );
    if server_configs.is_empty() {
        eprintln!(
            "No MCP servers configured. Add [[mcp_servers]] entries to {} or pass server \
             commands on the command line.",
            Config::config_path().display()
        );
        std::process::exit(1);
    }

    let model = args
        .model
        .as_deref()
        .unwrap_or_else(|| config.model())
        .to_string();
    let client = Arc::new(ModelClient::new(&args.base_url, &args.api_key, &model)?);

    let registry = match connect_servers(&server_configs).await {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    let Some(doc_session) = registry.first().cloned() else {
        eprintln!("Error: no MCP server connected");
        std::process::exit(1);
    };

    let options = CompletionOptions {
        system: config.system_prompt.clone(),
        ..CompletionOptions::default()
    };
    let chat = Chat::new(client, registry.clone())
        .with_options(options)
        .with_max_tool_turns(args.max_tool_turns.or(config.max_tool_turns))
        .with_observer(Arc::new(ConsoleObserver));
    let mut doc_chat = DocChat::new(chat, doc_session);

    println!(
        "bavard: chatting with {model} ({} server(s) connected)",
        registry.len()
    );
    println!("Log: {}", log_path.display());
    println!("Type a question, @doc_id to inline a document, /command for server prompts, quit to exit.\n");

    let result = repl(&mut doc_chat).await;

    registry.close_all().await;
    info!("Shutdown complete");
    result
}
