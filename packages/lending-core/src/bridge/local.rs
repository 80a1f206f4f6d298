use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::{MessageBridge, SendRequest};
use crate::{
    custody::SharedCustody,
    types::{Address, BridgeMessage, MessageId, MessageStatus},
    Error, Result,
};

#[derive(Default)]
struct BridgeState {
    nonce: u64,
    outbox: VecDeque<MessageId>,
    messages: HashMap<MessageId, BridgeMessage>,
    statuses: HashMap<MessageId, MessageStatus>,
}

/// 进程内桥模拟器：分配 message id，收取手续费，保存待投递消息
pub struct LocalBridge {
    router: Address,
    fee: u128,
    fee_token: SharedCustody,
    state: Mutex<BridgeState>,
}

impl LocalBridge {
    pub fn new(router: Address, fee: u128, fee_token: SharedCustody) -> Self {
        Self {
            router,
            fee,
            fee_token,
            state: Mutex::new(BridgeState::default()),
        }
    }

    pub fn router(&self) -> Address {
        self.router
    }

    /// 取出全部待投递消息
    pub async fn take_pending(&self) -> Vec<BridgeMessage> {
        let mut state = self.state.lock().await;
        let ids: Vec<MessageId> = state.outbox.drain(..).collect();
        ids.iter().filter_map(|id| state.messages.get(id).cloned()).collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.outbox.len()
    }

    /// 再次排队一条已发送的消息，模拟至少一次投递
    pub async fn redeliver(&self, message_id: &MessageId) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.messages.contains_key(message_id) {
            return Err(Error::UnknownMessage(*message_id));
        }
        warn!("Re-queueing message {} for redelivery", message_id);
        state.outbox.push_back(*message_id);
        Ok(())
    }

    pub async fn mark(&self, message_id: &MessageId, status: MessageStatus) {
        let mut state = self.state.lock().await;
        if let Some(current) = state.statuses.get_mut(message_id) {
            // 已处理的消息不会被重复投递的失败覆盖
            if *current != MessageStatus::Processed {
                *current = status;
            }
        }
    }

    pub async fn status(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.state.lock().await.statuses.get(message_id).copied()
    }
}

#[async_trait]
impl MessageBridge for LocalBridge {
    async fn get_fee(&self, _request: &SendRequest) -> Result<u128> {
        Ok(self.fee)
    }

    async fn send(&self, request: SendRequest) -> Result<MessageId> {
        if request.fee_token != self.fee_token.read().await.token() {
            return Err(Error::BridgeUnavailable(format!(
                "Unsupported fee token {}",
                request.fee_token
            )));
        }
        if request.receiver.is_zero() {
            return Err(Error::BridgeUnavailable("Receiver must be non-zero".to_string()));
        }

        let mut state = self.state.lock().await;
        let mut fee_token = self.fee_token.write().await;

        let available = fee_token.balance_of(&request.sender);
        if available < self.fee {
            return Err(Error::InsufficientFeeBalance {
                required: self.fee,
                available,
            });
        }
        fee_token.transfer(request.sender, self.router, self.fee)?;

        state.nonce += 1;
        let message_id = MessageId::digest(&[
            &request.source_chain_selector.to_be_bytes(),
            &request.destination_chain_selector.to_be_bytes(),
            request.sender.as_bytes(),
            request.receiver.as_bytes(),
            &state.nonce.to_be_bytes(),
            &request.payload,
        ]);

        let message = BridgeMessage {
            message_id,
            source_chain_selector: request.source_chain_selector,
            destination_chain_selector: request.destination_chain_selector,
            sender: request.sender,
            receiver: request.receiver,
            payload: request.payload,
            fee_token: request.fee_token,
        };

        debug!("Queued message {} with gas limit {}", message_id, request.gas_limit);
        state.messages.insert(message_id, message);
        state.statuses.insert(message_id, MessageStatus::Pending);
        state.outbox.push_back(message_id);

        info!(
            "Message {} sent from {} ({}) to {} ({})",
            message_id,
            request.sender,
            request.source_chain_selector,
            request.receiver,
            request.destination_chain_selector
        );
        Ok(message_id)
    }
}
