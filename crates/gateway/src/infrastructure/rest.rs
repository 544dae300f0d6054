use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use bookflow_core::{BookLevel, BookSnapshot, QualifiedMarket};

use crate::domain::{FetchError, SnapshotFetcher};

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {code} - {msg}")]
    Api { code: i32, msg: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convert infrastructure RestError to domain FetchError
impl From<RestError> for FetchError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http(e) => FetchError::Network(e.to_string()),
            RestError::Api { code, msg } => FetchError::Api { code, message: msg },
            RestError::Parse(msg) => FetchError::Parse(msg),
        }
    }
}

/// REST snapshot client for feeds that serve the engine's book format:
/// `GET {base}/{market}/book` returning `{market, sequence, bids, asks}`.
/// Infrastructure component - handles HTTP communication only.
#[derive(Clone)]
pub struct RestSnapshotFetcher {
    client: Client,
    base_url: String,
    depth: Option<u32>,
}

impl RestSnapshotFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        RestSnapshotFetcher {
            client: Client::new(),
            base_url: base_url.into(),
            depth: None,
        }
    }

    /// Limit snapshots to the top `depth` levels per side
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Get an order book snapshot for one market
    pub async fn get_book(&self, market: &QualifiedMarket) -> Result<BookSnapshot, RestError> {
        let mut url = format!("{}/{}/book", self.base_url, market.market);
        if let Some(depth) = self.depth {
            url = format!("{}?depth={}", url, depth);
        }

        let resp = self.client.get(&url).send().await?;
        let payload: BookPayload = handle_response(resp).await?;

        if payload.market != market.market.as_str() {
            return Err(RestError::Parse(format!(
                "snapshot for {} answered request for {}",
                payload.market, market.market
            )));
        }
        Ok(BookSnapshot::new(
            payload.bids,
            payload.asks,
            payload.sequence,
        ))
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, RestError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<ApiError>(&text) {
            return Err(RestError::Api {
                code: err.code,
                msg: err.msg,
            });
        }
        return Err(RestError::Parse(format!("HTTP {}: {}", status, text)));
    }

    serde_json::from_str(&text).map_err(|e| RestError::Parse(e.to_string()))
}

#[derive(Deserialize)]
struct BookPayload {
    market: String,
    sequence: u64,
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
}

#[derive(Deserialize)]
struct ApiError {
    code: i32,
    msg: String,
}

/// Converts infrastructure RestError to domain FetchError to maintain
/// proper dependency direction (infrastructure -> domain).
#[async_trait]
impl SnapshotFetcher for RestSnapshotFetcher {
    async fn fetch(&self, market: &QualifiedMarket) -> Result<BookSnapshot, FetchError> {
        self.get_book(market).await.map_err(FetchError::from)
    }
}
