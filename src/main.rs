use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use pdfchat::server::Servers;
use pdfchat::{
    assemble, process_pdf, respond_updates, sanitize, Config, GenerationParams, HfClient,
    ResponseUpdate,
};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "pdfchat")]
#[command(version)]
#[command(about = "Streaming chat and PDF text extraction", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.pdfchat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the UI server and the redirect endpoint (default)
    Serve,
    /// Send one message and stream the answer to stdout
    Ask {
        message: OsString,
        /// System prompt (defaults to the configured one)
        #[arg(long)]
        system: Option<OsString>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        top_p: Option<f32>,
    },
    /// Print the text extracted from a PDF file
    Extract { file: PathBuf },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

async fn serve(config: Config) -> Result<()> {
    let backend = Arc::new(HfClient::new(&config)?);
    tracing::info!(model = backend.model(), "starting pdfchat");

    let servers = Servers::start(&config, backend).await?;
    servers
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {}", e);
            }
        })
        .await;
    Ok(())
}

async fn ask(
    config: Config,
    message: OsString,
    system: Option<OsString>,
    params: GenerationParams,
) -> Result<()> {
    let backend = Arc::new(HfClient::new(&config)?);
    let system = system
        .map(|s| sanitize(s.as_encoded_bytes()))
        .unwrap_or(config.system_prompt);
    let payload = assemble(&[], &system, &sanitize(message.as_encoded_bytes()));

    let mut updates = respond_updates(backend, payload, params);
    let mut stdout = std::io::stdout();
    let mut printed = 0;
    while let Some(update) = updates.next().await {
        match &update {
            ResponseUpdate::Partial(text) => {
                // each update extends the previous one
                stdout.write_all(text[printed..].as_bytes())?;
                stdout.flush()?;
                printed = text.len();
            }
            ResponseUpdate::Failed(_) => {
                if printed > 0 {
                    println!();
                }
                anyhow::bail!("{}", update);
            }
        }
    }
    println!();
    Ok(())
}

fn extract(file: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    println!("{}", process_pdf(Some(&bytes)));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Ask {
            message,
            system,
            max_tokens,
            temperature,
            top_p,
        } => {
            let defaults = config.defaults;
            let params = GenerationParams::new(
                max_tokens.unwrap_or(defaults.max_tokens),
                temperature.unwrap_or(defaults.temperature),
                top_p.unwrap_or(defaults.top_p),
            )?;
            ask(config, message, system, params).await
        }
        Commands::Extract { file } => extract(file),
    }
}
