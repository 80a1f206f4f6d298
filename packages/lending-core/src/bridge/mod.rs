use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{
    types::{Address, BridgeMessage, ChainSelector, MessageId},
    Result,
};

pub mod local;

pub use local::LocalBridge;

/// 发送跨链消息所需的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub source_chain_selector: ChainSelector,
    pub sender: Address,
    pub destination_chain_selector: ChainSelector,
    pub receiver: Address,
    pub payload: Vec<u8>,
    pub fee_token: Address,
    pub gas_limit: u64,
}

/// 消息桥适配器，定义了发送跨链消息所需的基本功能
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBridge: Send + Sync {
    /// 查询发送消息所需的手续费
    async fn get_fee(&self, request: &SendRequest) -> Result<u128>;

    /// 提交消息，成功时返回桥分配的 message id。投递是异步的
    async fn send(&self, request: SendRequest) -> Result<MessageId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Applied,
    /// 重复投递，未修改任何状态
    Duplicate,
}

/// 入站消息回调
#[async_trait]
pub trait MessageReceiver: Send {
    async fn on_message_received(&mut self, message: BridgeMessage) -> Result<ReceiveOutcome>;
}

pub type SharedReceiver = Arc<Mutex<dyn MessageReceiver>>;
