use clap::Parser;
use gsp_billing::application::signature::WebhookVerifier;
use gsp_billing::config::{Config, ProcessorKind};
use gsp_billing::domain::ports::{LedgerStoreRef, PaymentProcessorRef};
use gsp_billing::infrastructure::fake_processor::FakePaymentProcessor;
use gsp_billing::infrastructure::http_processor::HttpPaymentProcessor;
use gsp_billing::infrastructure::in_memory::InMemoryLedgerStore;
use gsp_billing::interfaces::http::{AppState, router};
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);
    config.validate().into_diagnostic()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen,
        processor = ?config.processor,
        "Starting gsp-billing"
    );

    let store = open_store(&config)?;
    let processor: PaymentProcessorRef = match config.processor {
        ProcessorKind::Http => {
            let settings = config.processor_settings().into_diagnostic()?;
            Arc::new(
                HttpPaymentProcessor::new(
                    settings.base_url,
                    settings.secret_key,
                    config.processor_timeout(),
                )
                .into_diagnostic()?,
            )
        }
        ProcessorKind::Fake => {
            warn!("Using the in-process fake payment processor");
            Arc::new(FakePaymentProcessor::new())
        }
    };

    let state = AppState::new(
        store,
        processor,
        config.pricing().into_diagnostic()?,
        config.processor_timeout(),
        WebhookVerifier::new(&config.webhook_secret, config.signature_tolerance()),
    );

    let listener = TcpListener::bind(config.listen).await.into_diagnostic()?;
    info!(addr = %config.listen, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    info!("Shut down");
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "gsp_billing=info,tower_http=info".into()),
    );
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(config: &Config) -> Result<LedgerStoreRef> {
    use gsp_billing::infrastructure::rocksdb::RocksDbLedgerStore;

    match &config.db_path {
        Some(path) => {
            info!(path = %path.display(), "Opening RocksDB ledger");
            Ok(Arc::new(RocksDbLedgerStore::open(path).into_diagnostic()?))
        }
        None => {
            info!("Using in-memory ledger");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(config: &Config) -> Result<LedgerStoreRef> {
    if let Some(path) = &config.db_path {
        warn!(
            path = %path.display(),
            "Built without storage-rocksdb; falling back to the in-memory ledger"
        );
    } else {
        info!("Using in-memory ledger");
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
