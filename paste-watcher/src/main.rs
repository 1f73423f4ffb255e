use std::sync::Arc;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use kv_store::KvStore;
use paste_watcher::{
    config::Config,
    dedup::DedupCache,
    handlers,
    metrics::{self, setup_metrics_recorder},
    poller::{PollSettings, Poller},
    processor::{StoringProcessor, PASTES_BUCKET},
    source::HttpPasteSource,
};

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let log_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::init_from_env().context("failed to load configuration from env")?;
    config.validate().context("invalid configuration")?;

    info!(
        store_path = %config.store_path,
        poll_interval_secs = config.poll_interval_secs,
        max_age_secs = config.max_age_secs,
        "starting paste watcher"
    );

    let store = Arc::new(
        KvStore::open(config.store_config()?)
            .with_context(|| format!("failed to open store at {}", config.store_path))?,
    );
    store
        .add_bucket(PASTES_BUCKET)
        .context("failed to create pastes bucket")?;

    let source = HttpPasteSource::new(
        config.scrape_url.clone(),
        config.scrape_limit,
        config.http_timeout(),
    )
    .context("failed to create paste source")?;
    let processor = StoringProcessor::new(source.client().clone(), store.clone());

    let poller = Poller::new(
        Arc::new(source),
        Arc::new(processor),
        Arc::new(DedupCache::new()),
        PollSettings {
            interval: config.poll_interval(),
            max_age: config.max_age(),
        },
    );

    // The recorder is global, tests run without it
    let recorder_handle = if config.metrics_enabled {
        Some(setup_metrics_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };
    let app = handlers::app(poller.state(), recorder_handle);
    let bind = config.bind();

    tokio::select! {
        res = metrics::serve(app, &bind) => {
            if let Err(e) = res {
                error!("http server failed with: {}", e);
            }
        }
        _ = poller.run() => {
            error!("poll loop exited");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for shutdown signal: {}", e);
            }
            info!("shutting down");
        }
    }

    store.close().context("failed to close store")?;
    info!("exiting");

    Ok(())
}
