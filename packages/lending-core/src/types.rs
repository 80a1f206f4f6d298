use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// 跨链桥分配的链选择器
pub type ChainSelector = u64;

fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N], Error> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| Error::Serialization(format!("Invalid hex '{}': {}", s, e)))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| Error::Serialization(format!("Expected {} bytes, got {}", N, v.len())))
}

macro_rules! hex_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const ZERO: Self = Self([0u8; $len]);

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex::<$len>(s).map(Self)
            }
        }

        // 人类可读格式（JSON/TOML）使用 0x 十六进制，二进制格式（bcs）使用原始字节
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

hex_bytes!(Address, 20);
hex_bytes!(MessageId, 32);

impl Address {
    /// 由标签派生确定性地址，用于本地模拟
    pub fn from_label(label: &str) -> Self {
        let digest = Sha256::digest(label.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }
}

impl MessageId {
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }
}

/// 跨链消息信封。入站与出站使用同一结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub message_id: MessageId,
    pub source_chain_selector: ChainSelector,
    pub destination_chain_selector: ChainSelector,
    pub sender: Address,
    pub receiver: Address,
    pub payload: Vec<u8>,
    pub fee_token: Address,
}

/// 源链发出的存款载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositPayload {
    pub depositor: Address,
    pub token: Address,
    pub amount: u128,
}

/// 还款后发回源链的载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentPayload {
    pub original_message_id: MessageId,
    pub repayment_amount: u128,
    pub recipient: Address,
    /// 本次还款结清的全部存款消息，源链逐一释放托管
    pub released_message_ids: Vec<MessageId>,
}

/// 按 message id 索引的入站消息详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetail {
    pub source_chain_selector: ChainSelector,
    pub sender: Address,
    pub depositor: Address,
    pub token: Address,
    pub amount: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    MessageReceived {
        message_id: MessageId,
        source_chain_selector: ChainSelector,
        sender: Address,
        depositor: Address,
        token: Address,
        amount: u128,
    },
    Borrowed {
        message_id: MessageId,
        borrower: Address,
        token: Address,
        amount: u128,
    },
    Repaid {
        message_id: MessageId,
        borrower: Address,
        token: Address,
        amount: u128,
        settled: Vec<MessageId>,
    },
    MessageSent {
        message_id: MessageId,
        destination_chain_selector: ChainSelector,
        receiver: Address,
        original_message_id: MessageId,
        fee_token: Address,
        fees: u128,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let addr: Address = "0x00000000000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(addr.0[19], 0xff);
        assert_eq!(addr.to_string(), "0x00000000000000000000000000000000000000ff");

        let no_prefix: Address = "00000000000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(addr, no_prefix);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn test_json_uses_hex_strings() {
        let addr = Address::from_label("depositor");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_from_label_is_deterministic() {
        assert_eq!(Address::from_label("a"), Address::from_label("a"));
        assert_ne!(Address::from_label("a"), Address::from_label("b"));
    }
}
