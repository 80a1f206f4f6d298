use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::{types::Address, Error, Result};

pub mod rpc;

pub use rpc::RpcPriceFeed;

/// 价格源返回的一次报价，不做持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub round_id: u64,
    pub answer: i128,
    pub decimals: u8,
    pub updated_at: u64,
}

/// 价格预言机适配器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    fn description(&self) -> String;

    /// 获取资产的最新报价
    async fn latest_price(&self, asset: &Address) -> Result<PriceQuote>;
}

pub fn now_secs() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| Error::OracleUnavailable(format!("Failed to get current time: {}", e)))
}

/// 校验报价并返回正的价格值。报价视为不可信输入
pub fn validate_quote(quote: &PriceQuote, max_age_secs: Option<u64>, now: u64) -> Result<u128> {
    if quote.answer <= 0 {
        return Err(Error::OraclePriceInvalid(format!("non-positive answer {}", quote.answer)));
    }
    if quote.updated_at > now {
        return Err(Error::OraclePriceInvalid(format!(
            "quote timestamp {} is in the future",
            quote.updated_at
        )));
    }
    if let Some(max_age) = max_age_secs {
        if now - quote.updated_at > max_age {
            return Err(Error::StalePrice {
                updated_at: quote.updated_at,
                max_age,
            });
        }
    }
    Ok(quote.answer as u128)
}

/// 可手动更新的聚合器，行为与链上 mock aggregator 一致
pub struct StaticPriceFeed {
    description: String,
    round: RwLock<PriceQuote>,
}

impl StaticPriceFeed {
    pub fn new(description: &str, decimals: u8, answer: i128) -> Result<Self> {
        Ok(Self {
            description: description.to_string(),
            round: RwLock::new(PriceQuote {
                round_id: 1,
                answer,
                decimals,
                updated_at: now_secs()?,
            }),
        })
    }

    pub async fn update_answer(&self, answer: i128) -> Result<()> {
        let updated_at = now_secs()?;
        let mut round = self.round.write().await;
        round.round_id += 1;
        round.answer = answer;
        round.updated_at = updated_at;
        Ok(())
    }

    /// 直接写入整轮数据，用于回放历史报价
    pub async fn update_round(&self, answer: i128, updated_at: u64) {
        let mut round = self.round.write().await;
        round.round_id += 1;
        round.answer = answer;
        round.updated_at = updated_at;
    }
}

#[async_trait]
impl PriceOracle for StaticPriceFeed {
    fn description(&self) -> String {
        self.description.clone()
    }

    async fn latest_price(&self, _asset: &Address) -> Result<PriceQuote> {
        Ok(*self.round.read().await)
    }
}
