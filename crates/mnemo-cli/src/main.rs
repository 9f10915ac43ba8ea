use clap::{Parser, Subcommand};
use mnemo_core::Hints;
use mnemo_rag::{
    InMemoryKnowledgeStore, KnowledgeStore, RagConfig, RetrievalGateway, SqliteKnowledgeStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "mnemo.toml";

#[derive(Parser)]
#[command(name = "mnemo", about = "Mnemo — retrieval gateway for chat memory")]
struct Cli {
    /// Path to config file (defaults to ./mnemo.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query through the gateway
    Query {
        /// Query text
        text: String,
        /// Request hint as key=value; repeatable
        #[arg(long = "hint", value_parser = parse_hint)]
        hints: Vec<(String, serde_json::Value)>,
        /// Run the query this many times through the same gateway
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Print the rendered prompt context instead of raw JSON
        #[arg(long)]
        context: bool,
    },
    /// Print the effective configuration (API key redacted)
    Config,
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_hint(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("hint '{raw}' is not key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("hint '{raw}' has an empty key"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Defaults, then the TOML file, then the environment.
async fn load_config(path: Option<&Path>) -> anyhow::Result<RagConfig> {
    let base = match path {
        Some(path) => read_config(path).await?,
        None if Path::new(DEFAULT_CONFIG).exists() => read_config(Path::new(DEFAULT_CONFIG)).await?,
        None => RagConfig::default(),
    };
    Ok(base.apply_env()?)
}

async fn read_config(path: &Path) -> anyhow::Result<RagConfig> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        let shown = path.display();
        anyhow::anyhow!("Failed to read config file '{shown}': {e}")
    })?;
    Ok(toml::from_str(&raw)?)
}

fn open_store(config: &RagConfig) -> anyhow::Result<Arc<dyn KnowledgeStore>> {
    Ok(match &config.store.path {
        Some(path) => {
            info!(path = %path.display(), "Using SQLite knowledge store");
            Arc::new(SqliteKnowledgeStore::open(path)?)
        }
        None => {
            info!("No database configured, using an empty in-memory store");
            Arc::new(InMemoryKnowledgeStore::new())
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Query {
            text,
            hints,
            repeat,
            context,
        } => {
            let store = open_store(&config)?;
            let gateway = RetrievalGateway::from_config(&config, store)?;
            let hints: Hints = hints.into_iter().collect();

            info!(
                strategy = gateway.strategy_kind().as_str(),
                repeat, "Running query"
            );

            for _ in 0..repeat.max(1) {
                let result = gateway.retrieve(&text, &hints).await;
                if context {
                    println!("{}", result.render_context(4_000));
                } else {
                    println!("{}", serde_json::to_string(&result)?);
                }
            }

            let stats = serde_json::json!({
                "stats": gateway.stats(),
                "breaker": gateway.breaker_snapshot(),
            });
            println!("{stats}");
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mnemo_rag::StrategyKind;

    #[test]
    fn test_parse_hint_values() {
        assert_eq!(
            parse_hint("layer=prefs").unwrap(),
            ("layer".to_string(), serde_json::json!("prefs"))
        );
        assert_eq!(
            parse_hint("level=3").unwrap(),
            ("level".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            parse_hint("q=a=b").unwrap(),
            ("q".to_string(), serde_json::json!("a=b"))
        );
        assert!(parse_hint("novalue").is_err());
        assert!(parse_hint("=x").is_err());
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo.toml");
        std::fs::write(
            &path,
            "provider = \"vector\"\ncache_ttl_ms = 500\n\n[embedding]\nprovider = \"local\"\n",
        )
        .unwrap();

        let config = read_config(&path).await.unwrap();
        assert_eq!(config.provider, StrategyKind::Vector);
        assert_eq!(config.cache_ttl_ms, 500);
        assert_eq!(config.breaker_threshold, 3);
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_an_error() {
        let err = read_config(Path::new("/nonexistent/mnemo.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
