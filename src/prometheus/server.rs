// Shared scrape listener - one HTTP endpoint for every collector instance
//
// Only one listener can bind the configured scrape port, however many
// instances the process hosts. The agent constructs this endpoint lazily on
// first use and hands every instance a reference; instances register their
// scrape readers instead of binding ports of their own.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::exposition::{render, TEXT_FORMAT_CONTENT_TYPE};
use super::reader::{MergedScrapeReader, ScrapeReader};

/// Errors that can occur while standing up the scrape endpoint
#[derive(Error, Debug)]
pub enum ScrapeServerError {
    #[error("could not bind scrape listener on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
}

/// The process-wide scrape endpoint.
///
/// Constructed once, never recreated; serves `/metrics` by rendering the
/// merged snapshots of every registered reader.
pub struct ScrapeEndpoint {
    reader: Arc<MergedScrapeReader>,
    address: SocketAddr,
    server: JoinHandle<()>,
}

impl ScrapeEndpoint {
    /// Binds the listener and starts serving. Must run inside the Tokio
    /// runtime; the bind itself is synchronous so construct-once guards can
    /// wrap this call without async initialization.
    pub fn start(host: &str, port: u16) -> Result<Self, ScrapeServerError> {
        let address = format!("{}:{}", host, port);
        let listener = std::net::TcpListener::bind(&address).map_err(|source| {
            ScrapeServerError::Bind {
                address: address.clone(),
                source,
            }
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ScrapeServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_address = listener.local_addr().map_err(|source| ScrapeServerError::Bind {
            address: address.clone(),
            source,
        })?;

        let reader = Arc::new(MergedScrapeReader::new());
        let app = Router::new()
            .route("/metrics", get(serve_metrics))
            .with_state(Arc::clone(&reader));

        let server = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Scrape listener setup failed: {}", e);
                    return;
                }
            };
            if let Err(e) = axum::serve(listener, app).await {
                error!("Scrape listener terminated: {}", e);
            }
        });

        info!("Prometheus scrape endpoint listening on {}", local_address);
        Ok(ScrapeEndpoint {
            reader,
            address: local_address,
            server,
        })
    }

    /// Registers one instance's scrape reader with the shared endpoint.
    pub fn register_reader(&self, reader: Arc<ScrapeReader>) {
        self.reader.register_reader(reader);
    }

    pub fn merged_reader(&self) -> &Arc<MergedScrapeReader> {
        &self.reader
    }

    pub fn local_address(&self) -> SocketAddr {
        self.address
    }

    /// Stops serving. Called once at process shutdown.
    pub fn shutdown(&self) {
        self.server.abort();
        info!("Prometheus scrape endpoint on {} stopped", self.address);
    }
}

async fn serve_metrics(State(reader): State<Arc<MergedScrapeReader>>) -> impl IntoResponse {
    let body = render(&reader.collect());
    ([(header::CONTENT_TYPE, TEXT_FORMAT_CONTENT_TYPE)], body)
}
