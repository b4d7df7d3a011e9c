//! `engramd`: the long-running daemon process. Tails active session
//! transcripts, extracts durable memories, and serves hybrid recall over a
//! Unix domain socket (spec §4.12).

use engram_core::daemon::{Daemon, DaemonPaths};
use engram_core::embeddings::{mock::MockEmbeddingProvider, CachingEmbedder, EmbeddingProvider};
use engram_core::llm::{null::NullLlm, Llm};
use engram_daemon::config::{resolve_home, Config};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let home = resolve_home();
    let config = Config::load(&home);

    let paths = DaemonPaths::new(home, config.transcripts_root.clone());

    let llm: Arc<dyn Llm> = build_llm(&config);
    let embedder: Arc<dyn EmbeddingProvider> = build_embedder(&config, &paths).await?;

    let daemon = Daemon::new(paths, llm, embedder, config.topic_threshold).await?;
    daemon.run().await?;
    Ok(())
}

#[cfg(feature = "openai")]
fn build_llm(config: &Config) -> Arc<dyn Llm> {
    match &config.openai_api_key {
        Some(key) => Arc::new(engram_core::llm::openai::OpenAiLlm::new(key.clone())),
        None => Arc::new(NullLlm),
    }
}

#[cfg(not(feature = "openai"))]
fn build_llm(_config: &Config) -> Arc<dyn Llm> {
    Arc::new(NullLlm)
}

#[cfg(feature = "openai")]
async fn build_embedder(
    config: &Config,
    paths: &engram_core::daemon::DaemonPaths,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let store = Arc::new(tokio::sync::Mutex::new(
        engram_core::store::Store::open(&paths.db_path()).await?,
    ));
    let provider: Arc<dyn EmbeddingProvider> = match &config.openai_api_key {
        Some(key) => Arc::new(CachingEmbedder::new(
            engram_core::embeddings::openai::OpenAiEmbeddingProvider::new(key.clone()),
            store,
        )),
        None => Arc::new(CachingEmbedder::new(MockEmbeddingProvider, store)),
    };
    Ok(provider)
}

#[cfg(not(feature = "openai"))]
async fn build_embedder(
    _config: &Config,
    paths: &engram_core::daemon::DaemonPaths,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let store = Arc::new(tokio::sync::Mutex::new(
        engram_core::store::Store::open(&paths.db_path()).await?,
    ));
    Ok(Arc::new(CachingEmbedder::new(MockEmbeddingProvider, store)))
}

/// Installs a global `tracing` subscriber reading `RUST_LOG` (default
/// `info`), JSON-formatted when stdout is not a TTY (spec §4.0 "Logging &
/// tracing").
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if is_tty {
        subscriber.init();
    } else {
        subscriber.json().init();
    }
}
