use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    bridge::{MessageBridge, MessageReceiver, ReceiveOutcome, SendRequest},
    codec,
    config::{AllowedSender, Config, LedgerConfig, MAX_LTV_BPS},
    custody::SharedCustody,
    oracle::{now_secs, validate_quote, PriceOracle},
    types::{Address, BridgeMessage, ChainSelector, LedgerEvent, MessageDetail, MessageId, RepaymentPayload},
    Error, Result,
};

pub mod store;

pub use store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepayOutcome {
    /// 没有未偿借款，未发送消息
    NothingOutstanding,
    Sent { message_id: MessageId, fees: u128 },
}

fn pow10(exp: u32) -> Result<u128> {
    10u128.checked_pow(exp).ok_or(Error::ArithmeticOverflow("decimal scale"))
}

/// 按预言机价格与抵押率计算可借数量（借款代币最小单位，向下取整）
///
/// `amount * price * 10^borrow_decimals * ltv_bps / (10^price_decimals * 10^collateral_decimals * 10000)`
pub fn borrow_amount(amount: u128, price: u128, price_decimals: u8, config: &LedgerConfig) -> Result<u128> {
    let mut numerator = amount
        .checked_mul(price)
        .and_then(|v| v.checked_mul(config.ltv_bps as u128))
        .ok_or(Error::ArithmeticOverflow("collateral value"))?;
    let mut denominator = MAX_LTV_BPS as u128;

    let scale_up = config.borrow_decimals as i32;
    let scale_down = price_decimals as i32 + config.collateral_decimals as i32;
    let exp = scale_up - scale_down;
    if exp >= 0 {
        numerator = numerator
            .checked_mul(pow10(exp as u32)?)
            .ok_or(Error::ArithmeticOverflow("collateral value"))?;
    } else {
        denominator = denominator
            .checked_mul(pow10((-exp) as u32)?)
            .ok_or(Error::ArithmeticOverflow("decimal scale"))?;
    }

    Ok(numerator / denominator)
}

/// 目标链账本：接收跨链存款消息，按价格借出借款代币，还款后发回执
pub struct LedgerStateMachine {
    config: LedgerConfig,
    allowed_senders: HashSet<AllowedSender>,
    bridge: Arc<dyn MessageBridge>,
    borrow_token: SharedCustody,
    price_feeds: HashMap<Address, Arc<dyn PriceOracle>>,
    store: LedgerStore,
    events: Vec<LedgerEvent>,
}

impl LedgerStateMachine {
    pub async fn new(config: &Config, bridge: Arc<dyn MessageBridge>, borrow_token: SharedCustody) -> Result<Self> {
        config.validate()?;

        let custody_token = borrow_token.read().await.token();
        if custody_token != config.ledger.borrow_token {
            return Err(Error::Config(format!(
                "Borrow token custody is {} but config expects {}",
                custody_token, config.ledger.borrow_token
            )));
        }

        info!(
            "Ledger {} on chain {} lending {} at {} bps",
            config.ledger.address, config.ledger.chain_selector, config.ledger.borrow_token, config.ledger.ltv_bps
        );

        Ok(Self {
            config: config.ledger.clone(),
            allowed_senders: config.allowed_senders.iter().cloned().collect(),
            bridge,
            borrow_token,
            price_feeds: HashMap::new(),
            store: LedgerStore::default(),
            events: Vec::new(),
        })
    }

    /// 绑定价格源。地址必须出现在配置的 price_feeds 中
    pub fn register_price_feed(&mut self, feed: Address, oracle: Arc<dyn PriceOracle>) -> Result<()> {
        if !self.config.price_feeds.contains(&feed) {
            return Err(Error::UnknownPriceFeed(feed));
        }
        info!("Registered price feed {} ({})", feed, oracle.description());
        self.price_feeds.insert(feed, oracle);
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn chain_selector(&self) -> ChainSelector {
        self.config.chain_selector
    }

    pub fn borrow_token(&self) -> Address {
        self.config.borrow_token
    }

    pub fn message_detail(&self, message_id: &MessageId) -> Option<&MessageDetail> {
        self.store.message_detail(message_id)
    }

    pub fn last_received_message(&self) -> Option<(MessageId, &MessageDetail)> {
        self.store.last_received()
    }

    pub fn deposits(&self, depositor: &Address, token: &Address) -> u128 {
        self.store.deposit(depositor, token)
    }

    pub fn borrowings(&self, borrower: &Address, token: &Address) -> u128 {
        self.store.borrowing(borrower, token)
    }

    pub fn borrowed_against(&self, message_id: &MessageId) -> Option<u128> {
        self.store.borrowed_against(message_id)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    /// 处理桥投递的存款消息。重复投递同一 message id 不会重复入账
    pub async fn on_message_received(&mut self, message: BridgeMessage) -> Result<ReceiveOutcome> {
        if message.destination_chain_selector != self.config.chain_selector || message.receiver != self.config.address {
            warn!("Message {} is not addressed to this ledger", message.message_id);
            return Err(Error::Unauthorized(format!(
                "message {} addressed to {} on chain {}",
                message.message_id, message.receiver, message.destination_chain_selector
            )));
        }

        let origin = AllowedSender {
            chain_selector: message.source_chain_selector,
            sender: message.sender,
        };
        if !self.allowed_senders.contains(&origin) {
            warn!(
                "Rejected message {} from {} on chain {}",
                message.message_id, message.sender, message.source_chain_selector
            );
            return Err(Error::Unauthorized(format!(
                "sender {} on chain {} is not allow-listed",
                message.sender, message.source_chain_selector
            )));
        }

        if self.store.is_applied(&message.message_id) {
            info!("Message {} already applied, ignoring redelivery", message.message_id);
            return Ok(ReceiveOutcome::Duplicate);
        }

        let payload = codec::decode_deposit(&message.payload)?;
        let detail = MessageDetail {
            source_chain_selector: message.source_chain_selector,
            sender: message.sender,
            depositor: payload.depositor,
            token: payload.token,
            amount: payload.amount,
        };
        let new_balance = self.store.deposit_after(&detail)?;

        self.events.push(LedgerEvent::MessageReceived {
            message_id: message.message_id,
            source_chain_selector: detail.source_chain_selector,
            sender: detail.sender,
            depositor: detail.depositor,
            token: detail.token,
            amount: detail.amount,
        });
        info!(
            "Message {} received: depositor {} deposited {} of {} (balance {})",
            message.message_id, detail.depositor, detail.amount, detail.token, new_balance
        );
        self.store.commit_deposit(message.message_id, detail, new_balance);

        Ok(ReceiveOutcome::Applied)
    }

    /// 以某条存款消息为抵押借出借款代币，每条消息只能借一次
    pub async fn borrow(&mut self, message_id: &MessageId, price_feed: &Address) -> Result<u128> {
        let detail = self
            .store
            .message_detail(message_id)
            .cloned()
            .ok_or(Error::UnknownMessage(*message_id))?;

        if self.store.borrowed_against(message_id).is_some() {
            warn!("Message {} has already been borrowed against", message_id);
            return Err(Error::AlreadyBorrowed(*message_id));
        }
        // 托管已在源链释放
        if self.store.is_settled(message_id) {
            return Err(Error::AlreadyReleased(*message_id));
        }

        let oracle = self
            .price_feeds
            .get(price_feed)
            .cloned()
            .ok_or(Error::UnknownPriceFeed(*price_feed))?;

        let quote = oracle.latest_price(&detail.token).await?;
        let price = validate_quote(&quote, self.config.max_price_age_secs, now_secs()?)?;
        debug!(
            "Feed {} round {} price {} ({} decimals)",
            price_feed, quote.round_id, price, quote.decimals
        );

        let amount = borrow_amount(detail.amount, price, quote.decimals, &self.config)?;
        if amount == 0 {
            return Err(Error::ZeroBorrow(*message_id));
        }

        let borrow_token = self.config.borrow_token;
        let new_balance = self.store.borrowing_after(&detail.depositor, &borrow_token, amount)?;

        self.borrow_token
            .write()
            .await
            .mint(self.config.address, detail.depositor, amount)?;

        self.store
            .commit_borrow(*message_id, detail.depositor, borrow_token, amount, new_balance);
        self.events.push(LedgerEvent::Borrowed {
            message_id: *message_id,
            borrower: detail.depositor,
            token: borrow_token,
            amount,
        });
        info!(
            "Borrowed {} of {} against message {} for {}",
            amount, borrow_token, message_id, detail.depositor
        );

        Ok(amount)
    }

    /// 全额还款并向源链发送回执。还款金额必须与未偿借款完全一致
    pub async fn repay_and_send_message(
        &mut self,
        caller: Address,
        repayment_amount: u128,
        destination_chain_selector: ChainSelector,
        destination_recipient: Address,
        message_id: &MessageId,
    ) -> Result<RepayOutcome> {
        let borrow_token = self.config.borrow_token;
        let outstanding = self.store.borrowing(&caller, &borrow_token);
        if outstanding == 0 {
            info!("{} has no outstanding borrowings, nothing to repay", caller);
            return Ok(RepayOutcome::NothingOutstanding);
        }
        if repayment_amount != outstanding {
            warn!(
                "Repayment of {} by {} does not match outstanding {}",
                repayment_amount, caller, outstanding
            );
            return Err(Error::RepaymentMismatch {
                expected: outstanding,
                provided: repayment_amount,
            });
        }

        let detail = self
            .store
            .message_detail(message_id)
            .ok_or(Error::UnknownMessage(*message_id))?;
        if detail.depositor != caller {
            return Err(Error::Unauthorized(format!(
                "{} is not the depositor of message {}",
                caller, message_id
            )));
        }
        // 回执只能发回存款来源合约
        if detail.source_chain_selector != destination_chain_selector || detail.sender != destination_recipient {
            return Err(Error::Unauthorized(format!(
                "message {} originated from {} on chain {}",
                message_id, detail.sender, detail.source_chain_selector
            )));
        }

        // 回执覆盖全部未还清的借款消息以及所引用的存款消息
        let mut released = self.store.outstanding_messages(&caller, &borrow_token).to_vec();
        if !self.store.is_settled(message_id) && !released.contains(message_id) {
            released.push(*message_id);
        }
        for id in &released {
            let covered = self.store.message_detail(id).ok_or(Error::UnknownMessage(*id))?;
            if covered.source_chain_selector != destination_chain_selector || covered.sender != destination_recipient {
                return Err(Error::Unauthorized(format!(
                    "outstanding message {} originated from {} on chain {}",
                    id, covered.sender, covered.source_chain_selector
                )));
            }
        }

        let payload = codec::encode(&RepaymentPayload {
            original_message_id: *message_id,
            repayment_amount,
            recipient: caller,
            released_message_ids: released.clone(),
        })?;
        let request = SendRequest {
            source_chain_selector: self.config.chain_selector,
            sender: self.config.address,
            destination_chain_selector,
            receiver: destination_recipient,
            payload,
            fee_token: self.config.fee_token,
            gas_limit: self.config.gas_limit,
        };

        // 持有借款代币写锁直到销毁完成，检查与销毁之间余额不会变化
        let mut custody = self.borrow_token.write().await;
        custody.check_spend(&self.config.address, &caller, repayment_amount)?;

        let fees = self.bridge.get_fee(&request).await?;
        let outbound_id = self.bridge.send(request).await?;

        custody.burn_from(self.config.address, caller, repayment_amount)?;
        drop(custody);

        self.store.settle(&caller, &borrow_token, &released);
        self.events.push(LedgerEvent::Repaid {
            message_id: *message_id,
            borrower: caller,
            token: borrow_token,
            amount: repayment_amount,
            settled: released,
        });
        self.events.push(LedgerEvent::MessageSent {
            message_id: outbound_id,
            destination_chain_selector,
            receiver: destination_recipient,
            original_message_id: *message_id,
            fee_token: self.config.fee_token,
            fees,
        });
        info!(
            "{} repaid {} of {}, sent message {} to {} on chain {}",
            caller, repayment_amount, borrow_token, outbound_id, destination_recipient, destination_chain_selector
        );

        Ok(RepayOutcome::Sent {
            message_id: outbound_id,
            fees,
        })
    }
}

#[async_trait]
impl MessageReceiver for LedgerStateMachine {
    async fn on_message_received(&mut self, message: BridgeMessage) -> Result<ReceiveOutcome> {
        LedgerStateMachine::on_message_received(self, message).await
    }
}
