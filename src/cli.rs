use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::todos::{TodoPriority, TodoStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Ollama,
    Openai,
}

impl Provider {
    pub fn label(self) -> &'static str {
        match self {
            Provider::Auto => "auto",
            Provider::Ollama => "ollama",
            Provider::Openai => "openai",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum AgentCommands {
    #[command(about = "List registered agents with their tool schemas")]
    List,
}

#[derive(Debug, Subcommand)]
pub enum TodoCommands {
    #[command(about = "List todo records, optionally filtered")]
    List {
        #[arg(long, value_enum)]
        status: Option<TodoStatus>,
        #[arg(long, value_enum)]
        priority: Option<TodoPriority>,
        #[arg(long, value_name = "YYYY-MM-DD")]
        due_date: Option<chrono::NaiveDate>,
    },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServerCommands {
    #[command(about = "Run HTTP server mode for health, routing, agents, and todos")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  agent-router ask \"add buy groceries to my list with high priority\"\n\
  agent-router ask \"how are you today?\"\n\
  agent-router plan \"add milk and eggs, then show my open tasks\"\n\
  agent-router --provider openai --model gpt-4o-mini chat\n\
  agent-router --model-host http://gpu-box:11434 --model llama3.1 chat\n\
  agent-router agents list\n\
  agent-router todos list --status pending --priority high\n\
  agent-router server serve --host 127.0.0.1 --port 8787\n\
  agent-router telemetry report --limit 2000\n\
\n\
Configuration:\n\
  - Profiles live in .agent-router/config.toml under [profiles.<name>]; select with --profile.\n\
  - Flags and AGENT_ROUTER_* environment variables override profile values.\n\
  - Use {date} in --store-path to keep one todo file per day.";

#[derive(Debug, Parser)]
#[command(name = "agent-router")]
#[command(about = "Route free-text requests to agents with an LLM planner")]
#[command(version)]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "AGENT_ROUTER_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "AGENT_ROUTER_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "AGENT_ROUTER_MODEL_HOST")]
    pub model_host: Option<String>,

    #[arg(long, env = "AGENT_ROUTER_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "AGENT_ROUTER_CONFIG", default_value = ".agent-router/config.toml")]
    pub config_path: String,

    #[arg(long, env = "AGENT_ROUTER_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, env = "AGENT_ROUTER_STORE_PATH")]
    pub store_path: Option<String>,

    #[arg(long, env = "AGENT_ROUTER_EXTRACTION_MAX_RETRIES")]
    pub extraction_max_retries: Option<u32>,

    #[arg(long, env = "AGENT_ROUTER_EXTRACTION_RETRY_DELAY_MS")]
    pub extraction_retry_delay_ms: Option<u64>,

    #[arg(long, env = "AGENT_ROUTER_PLANNER_MAX_ATTEMPTS")]
    pub planner_max_attempts: Option<u32>,

    #[arg(long, env = "AGENT_ROUTER_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "AGENT_ROUTER_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "error")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Route one message and print the reply or per-step results")]
    Ask {
        #[arg(required = true)]
        message: Vec<String>,
    },
    #[command(about = "Run interactive chat mode")]
    Chat,
    #[command(about = "Generate and print a validated plan without dispatching it")]
    Plan {
        #[arg(required = true)]
        message: Vec<String>,
    },
    #[command(about = "Validate provider environment and storage paths")]
    Doctor,
    #[command(about = "Inspect the agent registry")]
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
    #[command(about = "Inspect the todo store directly")]
    Todos {
        #[command(subcommand)]
        command: TodoCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
    #[command(about = "Server mode")]
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Ask { .. } => "ask".to_string(),
        Commands::Chat => "chat".to_string(),
        Commands::Plan { .. } => "plan".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Agents { command } => match command {
            AgentCommands::List => "agents.list".to_string(),
        },
        Commands::Todos { command } => match command {
            TodoCommands::List { .. } => "todos.list".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
        Commands::Server { command } => match command {
            ServerCommands::Serve { .. } => "server.serve".to_string(),
        },
    }
}
