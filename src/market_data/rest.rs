// Thin transport wrappers over the backend REST API. Fetchers return the
// raw payload; normalisation is the caller's job, so a view can decide how
// tolerant to be.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{RestError, RestResult};
use crate::market_data::types::{OrderReceipt, OrderRequest};

const ORDER_BOOK_TIMEOUT: Duration = Duration::from_secs(10);
// bound user-visible latency on order placement
const PLACE_ORDER_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_TRADE_LIMIT: usize = 50;

pub struct MarketApi {
    http: Client,
    base_url: String,
}

impl MarketApi {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Current bids/asks snapshot for one property token, raw.
    pub async fn order_book(&self, property_id: &str) -> RestResult<Value> {
        let url = order_book_url(&self.base_url, property_id);
        let response = self
            .http
            .get(&url)
            .timeout(ORDER_BOOK_TIMEOUT)
            .send()
            .await
            .map_err(|err| transport("order book", err))?;
        let response = ok_or_status("order book", response)?;
        response
            .json()
            .await
            .map_err(|err| transport("order book", err))
    }

    /// Recent trade records for one property token, newest first, raw.
    pub async fn trade_history(
        &self,
        property_id: &str,
        limit: usize,
    ) -> RestResult<Vec<Value>> {
        let url = trade_history_url(&self.base_url, property_id, limit);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| transport("trade history", err))?;
        let response = ok_or_status("trade history", response)?;
        response
            .json()
            .await
            .map_err(|err| transport("trade history", err))
    }

    /// Submit a buy/sell order. A rejection body's `message` is surfaced to
    /// the caller; transport details are only logged.
    pub async fn place_order(&self, order: &OrderRequest) -> RestResult<OrderReceipt> {
        let url = orders_url(&self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(PLACE_ORDER_TIMEOUT)
            .json(order)
            .send()
            .await
            .map_err(|err| transport("place order", err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| transport("place order", err))?;

        if !status.is_success() {
            if let Ok(receipt) = serde_json::from_str::<OrderReceipt>(&body) {
                return Err(RestError::Rejected {
                    message: receipt.message,
                });
            }
            warn!(status = status.as_u16(), "order placement failed");
            return Err(RestError::Status {
                status: status.as_u16(),
            });
        }

        serde_json::from_str(&body).map_err(RestError::Decode)
    }

    /// Liveness probe: truthy on HTTP 2xx, never errors.
    pub async fn health(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "health probe failed");
                false
            }
        }
    }
}

fn transport(what: &str, err: reqwest::Error) -> RestError {
    warn!(request = what, error = %err, "market data request failed");
    RestError::Transport(err)
}

fn ok_or_status(what: &str, response: reqwest::Response) -> RestResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        warn!(request = what, status = status.as_u16(), "market data request failed");
        Err(RestError::Status {
            status: status.as_u16(),
        })
    }
}

fn order_book_url(base: &str, property_id: &str) -> String {
    format!("{base}/api/market/{property_id}/orderbook")
}

fn trade_history_url(base: &str, property_id: &str, limit: usize) -> String {
    format!("{base}/api/market/{property_id}/trades?limit={limit}")
}

fn orders_url(base: &str) -> String {
    format!("{base}/api/orders")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls_match_the_backend_contract() {
        assert_eq!(
            order_book_url("https://api.example.com", "prop-1"),
            "https://api.example.com/api/market/prop-1/orderbook"
        );
        assert_eq!(
            trade_history_url("https://api.example.com", "prop-1", 50),
            "https://api.example.com/api/market/prop-1/trades?limit=50"
        );
        assert_eq!(orders_url("https://api.example.com"), "https://api.example.com/api/orders");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = Config {
            api_url: "https://api.example.com/".to_string(),
            ..Config::default()
        };
        let api = MarketApi::new(&config);
        assert_eq!(api.base_url, "https://api.example.com");
    }
}
