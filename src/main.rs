use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pull_the_pitcher::config::{PipelineConfig, ServerConfig};
use pull_the_pitcher::model::Predictor;
use pull_the_pitcher::pipeline::Preprocessors;
use pull_the_pitcher::webapp::{build_router, AppState};

#[cfg(feature = "torch")]
fn load_predictor(config: &ServerConfig) -> anyhow::Result<Arc<dyn Predictor>> {
    let model = pull_the_pitcher::model::load_drsa(&config.model_path)
        .with_context(|| format!("failed to load model {}", config.model_path.display()))?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "torch"))]
fn load_predictor(config: &ServerConfig) -> anyhow::Result<Arc<dyn Predictor>> {
    anyhow::bail!(
        "cannot load {}: built without the `torch` feature",
        config.model_path.display()
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    let pipeline = PipelineConfig::load_or_default(config.pipeline_config.as_deref())?;
    let preprocessors = Preprocessors::load(&config.preprocessors_path)
        .with_context(|| format!("failed to read preprocessors {}", config.preprocessors_path.display()))?;
    tracing::info!(
        "loaded preprocessors: {} feature cols, vocab sizes {:?}",
        preprocessors.feature_cols().len(),
        preprocessors.mappers.vocab_sizes()
    );
    let predictor = load_predictor(&config)?;

    let state = AppState {
        predictor,
        preprocessors: Arc::new(preprocessors),
        config: Arc::new(pipeline),
        db_path: Arc::new(config.db_path.clone()),
    };
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
