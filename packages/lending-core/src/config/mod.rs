use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::types::{Address, ChainSelector};
use crate::Error;

pub const MAX_LTV_BPS: u16 = 10_000;
// 10^36 仍可放入 u128
const MAX_DECIMALS: u8 = 36;

fn default_ltv_bps() -> u16 {
    MAX_LTV_BPS
}

fn default_decimals() -> u8 {
    18
}

fn default_gas_limit() -> u64 {
    200_000
}

/// TOML 整数为 i64，链选择器可能超出范围，因此同时接受数字与字符串
fn chain_selector_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ChainSelector, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    pub address: Address,
    #[serde(deserialize_with = "chain_selector_from_any")]
    pub chain_selector: ChainSelector,
    pub router: Address,
    pub borrow_token: Address,
    pub fee_token: Address,
    /// 抵押率，单位为基点
    #[serde(default = "default_ltv_bps")]
    pub ltv_bps: u16,
    #[serde(default = "default_decimals")]
    pub collateral_decimals: u8,
    #[serde(default = "default_decimals")]
    pub borrow_decimals: u8,
    #[serde(default)]
    pub max_price_age_secs: Option<u64>,
    pub price_feeds: Vec<Address>,
    /// 还款回执消息的 gas 上限
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct AllowedSender {
    #[serde(deserialize_with = "chain_selector_from_any")]
    pub chain_selector: ChainSelector,
    pub sender: Address,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OriginConfig {
    pub address: Address,
    #[serde(deserialize_with = "chain_selector_from_any")]
    pub chain_selector: ChainSelector,
    pub router: Address,
    pub fee_token: Address,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BridgeConfig {
    pub fee: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    pub poll_interval: u64,
    pub max_retries: u32,
    pub retry_delay: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub origin: OriginConfig,
    pub allowed_senders: Vec<AllowedSender>,
    pub bridge: BridgeConfig,
    pub relayer: RelayerConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&config_str)?,
            _ => Self::from_json_str(&config_str)?,
        };

        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let config: Config = serde_json::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Config =
            toml::from_str(s).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let ledger = &self.ledger;

        // 抵押率
        if ledger.ltv_bps == 0 || ledger.ltv_bps > MAX_LTV_BPS {
            return Err(Error::Config(format!(
                "ltv_bps must be within 1..={}, got {}",
                MAX_LTV_BPS, ledger.ltv_bps
            )));
        }
        if ledger.collateral_decimals > MAX_DECIMALS || ledger.borrow_decimals > MAX_DECIMALS {
            return Err(Error::Config(format!("Token decimals must not exceed {}", MAX_DECIMALS)));
        }
        if ledger.price_feeds.is_empty() {
            return Err(Error::Config("At least one price feed must be configured".to_string()));
        }
        if ledger.borrow_token.is_zero() || ledger.address.is_zero() {
            return Err(Error::Config("Ledger and borrow token addresses must be non-zero".to_string()));
        }

        // 还款时同时持有借款代币与手续费代币的锁
        if ledger.fee_token == ledger.borrow_token {
            return Err(Error::Config("Fee token must differ from the borrow token".to_string()));
        }

        if ledger.chain_selector == self.origin.chain_selector {
            return Err(Error::Config(format!(
                "Ledger and origin share chain selector {}",
                ledger.chain_selector
            )));
        }

        // 白名单
        if self.allowed_senders.is_empty() {
            return Err(Error::Config("allowed_senders must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for entry in &self.allowed_senders {
            if !seen.insert(entry) {
                return Err(Error::Config(format!(
                    "Duplicate allowed sender {} on chain {}",
                    entry.sender, entry.chain_selector
                )));
            }
        }

        // 中继器配置
        if self.relayer.poll_interval == 0 {
            return Err(Error::Config("Relayer poll interval must be greater than 0".to_string()));
        }
        if self.relayer.max_retries == 0 {
            return Err(Error::Config("Relayer max retries must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// 源链只接受账本合约发回的消息
    pub fn ledger_as_sender(&self) -> AllowedSender {
        AllowedSender {
            chain_selector: self.ledger.chain_selector,
            sender: self.ledger.address,
        }
    }
}
