use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

use super::{PriceOracle, PriceQuote};
use crate::{types::Address, Error, Result};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct RoundData {
    round_id: u64,
    answer: i64,
    decimals: u8,
    updated_at: u64,
}

/// 通过 JSON-RPC 读取外部价格源
pub struct RpcPriceFeed {
    rpc_url: String,
    feed: Address,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RpcPriceFeed {
    pub fn new(rpc_url: &str, feed: Address) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            feed,
            client: reqwest::Client::new(),
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn retry_with_backoff<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    retries += 1;
                    if retries >= self.max_retries {
                        return Err(e);
                    }
                    let delay = self.retry_delay.saturating_mul(2u32.saturating_pow(retries - 1));
                    warn!("Price feed {} query failed ({}), retry {} in {:?}", self.feed, e, retries, delay);
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_round(&self, asset: &Address) -> Result<PriceQuote> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "oracle_latestRoundData",
                "params": [
                    {
                        "feed": self.feed.to_string(),
                        "asset": asset.to_string()
                    }
                ],
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| Error::OracleUnavailable(e.to_string()))?;

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::OracleUnavailable(e.to_string()))?;

        if let Some(error) = result.get("error") {
            return Err(Error::OracleUnavailable(format!("RPC error: {}", error)));
        }

        let round = match result.get("result") {
            Some(value) if !value.is_null() => RoundData::deserialize(value)
                .map_err(|e| Error::OraclePriceInvalid(format!("Bad round data: {}", e)))?,
            _ => return Err(Error::OracleUnavailable("No round data available".to_string())),
        };

        debug!("Feed {} round {} answer {}", self.feed, round.round_id, round.answer);

        Ok(PriceQuote {
            round_id: round.round_id,
            answer: round.answer as i128,
            decimals: round.decimals,
            updated_at: round.updated_at,
        })
    }
}

#[async_trait]
impl PriceOracle for RpcPriceFeed {
    fn description(&self) -> String {
        format!("rpc:{}", self.feed)
    }

    async fn latest_price(&self, asset: &Address) -> Result<PriceQuote> {
        self.retry_with_backoff(|| self.fetch_round(asset)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_for(server: &mockito::Server) -> RpcPriceFeed {
        RpcPriceFeed::new(&server.url(), Address::from_label("bnm-usd-feed")).with_retry(2, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fetch_latest_round() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "method": "oracle_latestRoundData"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"round_id":7,"answer":135139880,"decimals":8,"updated_at":1700000000}}"#)
            .create_async()
            .await;

        let quote = feed_for(&server)
            .latest_price(&Address::from_label("bnm"))
            .await
            .unwrap();

        assert_eq!(quote.round_id, 7);
        assert_eq!(quote.answer, 135139880);
        assert_eq!(quote.decimals, 8);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rpc_error_is_retried_then_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"feed paused"}}"#)
            .expect(2)
            .create_async()
            .await;

        let err = feed_for(&server)
            .latest_price(&Address::from_label("bnm"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OracleUnavailable(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_null_result_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;

        let err = feed_for(&server)
            .latest_price(&Address::from_label("bnm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OracleUnavailable(_)));
    }

    #[tokio::test]
    async fn test_bad_round_data_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"round_id":"x"}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = feed_for(&server)
            .latest_price(&Address::from_label("bnm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OraclePriceInvalid(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_large_retry_count_does_not_overflow_backoff() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"feed paused"}}"#)
            .expect(40)
            .create_async()
            .await;

        let feed = RpcPriceFeed::new(&server.url(), Address::from_label("bnm-usd-feed")).with_retry(40, Duration::ZERO);
        let err = feed.latest_price(&Address::from_label("bnm")).await.unwrap_err();
        assert!(err.is_retryable());
        mock.assert_async().await;
    }
}
