use async_trait::async_trait;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    bridge::{MessageBridge, MessageReceiver, ReceiveOutcome, SendRequest},
    codec,
    config::{AllowedSender, Config},
    custody::SharedCustody,
    types::{Address, BridgeMessage, ChainSelector, DepositPayload, MessageId},
    Error, Result,
};

/// 源链托管的抵押品
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escrow {
    pub depositor: Address,
    pub token: Address,
    pub amount: u128,
    pub released: bool,
}

/// 源链发送端：托管存款代币并向账本发送存款消息，收到还款回执后释放托管
pub struct OriginRelay {
    address: Address,
    chain_selector: ChainSelector,
    fee_token: Address,
    gas_limit: u64,
    ledger: AllowedSender,
    bridge: Arc<dyn MessageBridge>,
    collateral: HashMap<Address, SharedCustody>,
    escrows: HashMap<MessageId, Escrow>,
    applied_receipts: HashSet<MessageId>,
}

impl OriginRelay {
    pub fn new(config: &Config, bridge: Arc<dyn MessageBridge>) -> Self {
        Self {
            address: config.origin.address,
            chain_selector: config.origin.chain_selector,
            fee_token: config.origin.fee_token,
            gas_limit: config.origin.gas_limit,
            ledger: config.ledger_as_sender(),
            bridge,
            collateral: HashMap::new(),
            escrows: HashMap::new(),
            applied_receipts: HashSet::new(),
        }
    }

    /// 登记可作为抵押品发送的代币。发送时同时持有抵押品与手续费代币的锁，手续费代币不能作抵押
    pub async fn support_token(&mut self, custody: SharedCustody) -> Result<()> {
        let token = custody.read().await.token();
        if token == self.fee_token {
            return Err(Error::Config(format!(
                "Fee token {} cannot be accepted as collateral",
                token
            )));
        }
        info!("Origin relay {} accepts collateral {}", self.address, token);
        self.collateral.insert(token, custody);
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_selector(&self) -> ChainSelector {
        self.chain_selector
    }

    pub fn escrow(&self, message_id: &MessageId) -> Option<&Escrow> {
        self.escrows.get(message_id)
    }

    fn custody_for(&self, token: &Address) -> Result<&SharedCustody> {
        self.collateral
            .get(token)
            .ok_or_else(|| Error::Unauthorized(format!("token {} is not accepted as collateral", token)))
    }

    /// 托管调用者的代币并发送存款消息。调用者需事先授权本合约
    pub async fn send_message(
        &mut self,
        caller: Address,
        destination_chain_selector: ChainSelector,
        receiver: Address,
        token: Address,
        amount: u128,
        gas_limit: Option<u64>,
    ) -> Result<MessageId> {
        if amount == 0 {
            return Err(Error::MalformedPayload("deposit amount must be positive".to_string()));
        }
        let custody = self.custody_for(&token)?.clone();

        let payload = codec::encode(&DepositPayload {
            depositor: caller,
            token,
            amount,
        })?;
        let request = SendRequest {
            source_chain_selector: self.chain_selector,
            sender: self.address,
            destination_chain_selector,
            receiver,
            payload,
            fee_token: self.fee_token,
            gas_limit: gas_limit.unwrap_or(self.gas_limit),
        };

        let mut collateral = custody.write().await;
        collateral.check_spend(&self.address, &caller, amount)?;

        let message_id = self.bridge.send(request).await?;
        collateral.transfer_from(self.address, caller, self.address, amount)?;
        drop(collateral);

        self.escrows.insert(
            message_id,
            Escrow {
                depositor: caller,
                token,
                amount,
                released: false,
            },
        );
        info!(
            "Escrowed {} of {} from {}, message {} sent to {} on chain {}",
            amount, token, caller, message_id, receiver, destination_chain_selector
        );

        Ok(message_id)
    }

    /// 处理账本发回的还款回执，释放对应托管
    pub async fn on_message_received(&mut self, message: BridgeMessage) -> Result<ReceiveOutcome> {
        if message.receiver != self.address || message.destination_chain_selector != self.chain_selector {
            return Err(Error::Unauthorized(format!(
                "message {} is not addressed to this relay",
                message.message_id
            )));
        }
        if message.source_chain_selector != self.ledger.chain_selector || message.sender != self.ledger.sender {
            warn!("Rejected receipt {} from {}", message.message_id, message.sender);
            return Err(Error::Unauthorized(format!(
                "sender {} on chain {} is not the ledger",
                message.sender, message.source_chain_selector
            )));
        }
        if self.applied_receipts.contains(&message.message_id) {
            info!("Receipt {} already applied, ignoring redelivery", message.message_id);
            return Ok(ReceiveOutcome::Duplicate);
        }

        let receipt = codec::decode_repayment(&message.payload)?;

        // 先校验回执覆盖的全部托管，再逐一释放
        let mut releases = Vec::with_capacity(receipt.released_message_ids.len());
        let mut totals: HashMap<Address, u128> = HashMap::new();
        for id in &receipt.released_message_ids {
            let escrow = self.escrows.get(id).cloned().ok_or(Error::UnknownMessage(*id))?;
            if escrow.released {
                return Err(Error::AlreadyReleased(*id));
            }
            if escrow.depositor != receipt.recipient {
                return Err(Error::Unauthorized(format!(
                    "receipt recipient {} does not own escrow {}",
                    receipt.recipient, id
                )));
            }
            let total = totals.entry(escrow.token).or_default();
            *total = total
                .checked_add(escrow.amount)
                .ok_or(Error::ArithmeticOverflow("escrow release"))?;
            releases.push((*id, escrow));
        }

        for (token, total) in &totals {
            let custody = self.custody_for(token)?;
            let held = custody.read().await.balance_of(&self.address);
            if held < *total {
                return Err(Error::InsufficientBalance {
                    required: *total,
                    available: held,
                });
            }
        }

        for (id, escrow) in &releases {
            self.custody_for(&escrow.token)?
                .write()
                .await
                .transfer(self.address, escrow.depositor, escrow.amount)?;
            if let Some(entry) = self.escrows.get_mut(id) {
                entry.released = true;
            }
            info!(
                "Released {} of {} to {} for message {}",
                escrow.amount, escrow.token, escrow.depositor, id
            );
        }
        self.applied_receipts.insert(message.message_id);
        info!(
            "Receipt {} for message {} settled {} escrows",
            message.message_id,
            receipt.original_message_id,
            releases.len()
        );

        Ok(ReceiveOutcome::Applied)
    }
}

#[async_trait]
impl MessageReceiver for OriginRelay {
    async fn on_message_received(&mut self, message: BridgeMessage) -> Result<ReceiveOutcome> {
        OriginRelay::on_message_received(self, message).await
    }
}
