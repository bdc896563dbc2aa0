mod factory;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use factory::CliFactory;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use verity_engine::Runtime;
use verity_engine::config::{ConfigLoader, VerityConfig};
use verity_engine::formatter::format_message;
use verity_engine::presentation::{ChannelSink, FanoutSink, PresentationSink};
use verity_engine::protocol::{ExpectedAction, Parameters, PresentationMessage};
use verity_engine::session::SessionState;
use verity_r::PresentationServer;

#[derive(Parser)]
#[command(name = "verity", version, about = "Live verification of spreadsheet actions")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Config file (defaults to ./verity.yaml, then ~/.verity/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Launch browser in visible mode (not headless)
    #[arg(long, global = true)]
    visible: bool,

    /// Also broadcast presentation messages over WebSocket on this port
    #[arg(long, global = true)]
    ws_port: Option<u16>,

    /// Backend state endpoint; `{resource_id}` is substituted
    #[arg(long, global = true)]
    state_endpoint: Option<String>,

    /// Visual analysis endpoint
    #[arg(long, global = true)]
    vision_endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Mode {
    /// Watch a sheet and print presentation messages as JSON lines until Ctrl-C
    Watch {
        #[arg(long)]
        user: String,
        /// Sheet URL or bare resource id
        #[arg(long)]
        target: String,
    },
    /// Wait for one action and print how it compares with the expected one
    Verify {
        #[arg(long)]
        user: String,
        #[arg(long)]
        target: String,
        /// Expected tool name
        #[arg(long)]
        tool: String,
        /// Expected parameter as key=value; JSON values are parsed
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        /// Human description used in feedback
        #[arg(long)]
        description: Option<String>,
        /// Seconds to wait (defaults to verifier.default_timeout_secs)
        #[arg(long)]
        timeout: Option<f64>,
    },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn load_config(args: &Args) -> anyhow::Result<VerityConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    if args.visible {
        config.collaborators.visible = true;
    }
    if let Some(endpoint) = &args.state_endpoint {
        config.collaborators.state_endpoint = Some(endpoint.clone());
    }
    if let Some(endpoint) = &args.vision_endpoint {
        config.collaborators.vision_endpoint = Some(endpoint.clone());
    }
    Ok(config)
}

async fn build_sink(
    ws_port: Option<u16>,
) -> anyhow::Result<(Arc<dyn PresentationSink>, mpsc::UnboundedReceiver<PresentationMessage>)> {
    let (channel, rx) = ChannelSink::new();
    let mut sinks: Vec<Arc<dyn PresentationSink>> = vec![Arc::new(channel)];
    if let Some(port) = ws_port {
        let handle = PresentationServer::new(port)
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("starting presentation server: {}", e))?;
        info!("Dashboards can connect to ws://{}", handle.addr);
        sinks.push(Arc::new(handle));
    }
    Ok((Arc::new(FanoutSink::new(sinks)), rx))
}

async fn watch(runtime: &Runtime, user: &str, target: &str) -> anyhow::Result<()> {
    let started = runtime.start_session(user, target).await;
    if !started.success {
        bail!("{}", started.message);
    }
    info!("{} (Ctrl-C to stop)", started.message);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let closed = runtime
                    .get_session_status(user)
                    .is_none_or(|s| s.state == SessionState::Closed);
                if closed {
                    info!("Session ended");
                    break;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries JSON only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args).await?;
    let default_timeout = config.verifier.default_timeout_secs;

    let (sink, mut messages) = build_sink(args.ws_port).await?;
    let factory = Arc::new(CliFactory::new(config.collaborators.clone()));
    let runtime = Runtime::new(config, factory, sink)?;

    let json_lines = matches!(args.mode, Mode::Watch { .. });
    let printer = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            if json_lines {
                match serde_json::to_string(&message) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to encode message: {}", e),
                }
            } else {
                info!("{}", format_message(&message));
            }
        }
    });

    let outcome = match args.mode {
        Mode::Watch { user, target } => watch(&runtime, &user, &target).await,
        Mode::Verify {
            user,
            target,
            tool,
            params,
            description,
            timeout,
        } => {
            let started = runtime.start_session(&user, &target).await;
            if started.success {
                let mut expected =
                    ExpectedAction::new(tool, params.into_iter().collect::<Parameters>());
                expected.description = description;
                info!("Waiting for '{}'...", expected.tool_name);
                let result = runtime
                    .await_and_verify(&user, expected, timeout.unwrap_or(default_timeout))
                    .await;
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            } else {
                Err(anyhow::anyhow!("{}", started.message))
            }
        }
    };

    runtime.shutdown().await;
    drop(runtime);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    outcome
}
