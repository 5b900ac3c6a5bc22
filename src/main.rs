use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pact::api::{self, AppState};
use pact::providers::build_provider;
use pact::storage::{CapabilityRegistry, IntentCatalog};
use pact::{Config, Manifest, Parameters, ResolutionEngine, ResolutionRequest};

#[derive(Parser)]
#[command(name = "pact")]
#[command(about = "Intent resolution for cross-platform agent messaging", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Intents and capabilities to load (.yaml, .toml or .json)
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an utterance or action and print the result as JSON
    Resolve {
        #[arg(help = "Free-text utterance")]
        text: Option<String>,

        #[arg(long, help = "Explicit action token")]
        action: Option<String>,

        #[arg(long = "param", value_parser = parse_param, help = "Parameter as key=value")]
        params: Vec<(String, serde_json::Value)>,

        #[arg(long, help = "Preferred intent category")]
        category: Option<String>,
    },
    /// Pick the agent best able to perform an action
    Negotiate {
        action: String,

        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in `{}`", raw));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,pact=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    let manifest = cli.manifest.clone().or_else(|| config.manifest.clone());
    let engine = build_engine(&config, manifest)?;

    match cli.command {
        Commands::Resolve {
            text,
            action,
            params,
            category,
        } => {
            let mut request = ResolutionRequest::new(text.unwrap_or_default())
                .with_parameters(params.into_iter().collect());
            request.action = action;
            request.category_hint = category;

            let result = engine.resolve_request(&request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Negotiate { action, params } => {
            let supplied: Parameters = params.into_iter().collect();
            match engine.negotiate(&action, &supplied) {
                Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                None => anyhow::bail!("no agent advertises `{}`", action),
            }
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let engine = Arc::new(engine);
            tokio::spawn({
                let engine = engine.clone();
                async move {
                    match engine.warm().await {
                        Ok(count) => log::info!("pre-embedded {} intents", count),
                        Err(e) => {
                            log::warn!("could not pre-embed catalog, will retry on demand: {}", e)
                        }
                    }
                }
            });
            api::serve(AppState { engine }, port).await?;
        }
    }

    Ok(())
}

fn build_engine(config: &Config, manifest: Option<PathBuf>) -> Result<ResolutionEngine> {
    let (catalog, registry) = match manifest {
        Some(path) => Manifest::load(&path)?
            .into_stores()
            .with_context(|| format!("loading manifest {}", path.display()))?,
        None => {
            log::warn!("no manifest given; starting with an empty catalog and registry");
            (IntentCatalog::new(), CapabilityRegistry::new())
        }
    };
    let provider = build_provider(&config.embedding)?;
    log::info!(
        "{} intents, {} capabilities, embeddings via {}",
        catalog.len(),
        registry.len(),
        provider.name()
    );

    let engine = ResolutionEngine::new(
        config.engine.clone(),
        Arc::new(catalog),
        Arc::new(registry),
        provider,
    )?;
    Ok(engine)
}
