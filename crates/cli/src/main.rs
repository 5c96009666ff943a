use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use lib::channels::{Activity, ActivityAccount, ActivityConversation, SinkEvent};
use std::io::Write;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Tenant-gated streaming completion relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json (upstream credentials left empty).
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (POST /api/messages, GET / health). Needs the AZURE_OPENAI_* settings.
    Gateway {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from PORT, config, or 3978)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send one message to a running gateway and print the streamed reply.
    Send {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Gateway base URL (default: derived from gateway.bind and gateway.port)
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Tenant id to put on the activity
        #[arg(long, value_name = "ID")]
        tenant: Option<String>,

        /// Conversation id (default: cli)
        #[arg(long, value_name = "ID", default_value = "cli")]
        conversation: String,

        /// Message text
        text: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            url,
            tenant,
            conversation,
            text,
        }) => {
            if let Err(e) = run_send(config, url, tenant, conversation, text).await {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    lib::gateway::run_gateway(config).await
}

fn gateway_url(config: &lib::config::Config) -> String {
    let bind = config.gateway.bind.trim();
    let host = if bind == "0.0.0.0" || bind.is_empty() {
        "127.0.0.1"
    } else {
        bind
    };
    format!("http://{}:{}", host, config.gateway.port)
}

fn message_activity(text: String, conversation: String, tenant: Option<String>) -> Activity {
    Activity {
        activity_type: "message".to_string(),
        id: Some(uuid::Uuid::new_v4().to_string()),
        text: Some(text),
        from: Some(ActivityAccount {
            id: Some("relay-cli".to_string()),
            name: None,
        }),
        conversation: Some(ActivityConversation {
            id: Some(conversation),
            tenant_id: tenant,
        }),
        ..Default::default()
    }
}

async fn run_send(
    config_path: Option<std::path::PathBuf>,
    url: Option<String>,
    tenant: Option<String>,
    conversation: String,
    text: String,
) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let base = url.unwrap_or_else(|| gateway_url(&config));
    let endpoint = format!("{}/api/messages", base.trim_end_matches('/'));

    let mut request = reqwest::Client::new()
        .post(&endpoint)
        .json(&message_activity(text, conversation, tenant));
    if let Some(token) = lib::config::resolve_gateway_token(&config) {
        request = request.bearer_auth(token);
    }
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("gateway returned {} for {}", status, endpoint);
    }

    let mut stdout = std::io::stdout();
    let mut buf: Vec<u8> = Vec::new();
    let mut body = resp.bytes_stream();
    while let Some(bytes) = body.next().await {
        buf.extend_from_slice(&bytes?);
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SinkEvent>(line) {
                Ok(event) => print_event(&mut stdout, &event)?,
                Err(e) => log::warn!("unreadable line from gateway: {} ({})", line, e),
            }
        }
    }
    Ok(())
}

fn print_event(out: &mut impl Write, event: &SinkEvent) -> std::io::Result<()> {
    match event {
        SinkEvent::StreamInfo { .. } => {}
        SinkEvent::Chunk { text } => {
            write!(out, "{}", text)?;
            out.flush()?;
        }
        SinkEvent::End => writeln!(out)?,
        SinkEvent::Message { text } => writeln!(out, "{}", text)?,
        SinkEvent::InvokeResponse { status } => writeln!(out, "invoke response: {}", status)?,
    }
    Ok(())
}
