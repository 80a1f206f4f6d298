use std::collections::{HashMap, HashSet};

use crate::{
    types::{Address, MessageDetail, MessageId},
    Error, Result,
};

/// 账本状态：存款、借款、已应用消息索引
#[derive(Debug, Default, Clone)]
pub struct LedgerStore {
    message_details: HashMap<MessageId, MessageDetail>,
    deposits: HashMap<(Address, Address), u128>,
    borrowings: HashMap<(Address, Address), u128>,
    /// message id -> 针对该消息借出的数量
    borrowed_against: HashMap<MessageId, u128>,
    /// (借款人, 借款代币) -> 尚未还清的已借款消息
    outstanding: HashMap<(Address, Address), Vec<MessageId>>,
    /// 已随还款回执释放托管的消息
    settled: HashSet<MessageId>,
    last_received: Option<MessageId>,
}

impl LedgerStore {
    pub fn message_detail(&self, message_id: &MessageId) -> Option<&MessageDetail> {
        self.message_details.get(message_id)
    }

    pub fn is_applied(&self, message_id: &MessageId) -> bool {
        self.message_details.contains_key(message_id)
    }

    pub fn deposit(&self, depositor: &Address, token: &Address) -> u128 {
        self.deposits.get(&(*depositor, *token)).copied().unwrap_or(0)
    }

    pub fn borrowing(&self, borrower: &Address, token: &Address) -> u128 {
        self.borrowings.get(&(*borrower, *token)).copied().unwrap_or(0)
    }

    pub fn borrowed_against(&self, message_id: &MessageId) -> Option<u128> {
        self.borrowed_against.get(message_id).copied()
    }

    pub fn outstanding_messages(&self, borrower: &Address, token: &Address) -> &[MessageId] {
        self.outstanding
            .get(&(*borrower, *token))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_settled(&self, message_id: &MessageId) -> bool {
        self.settled.contains(message_id)
    }

    pub fn last_received(&self) -> Option<(MessageId, &MessageDetail)> {
        let id = self.last_received?;
        self.message_details.get(&id).map(|detail| (id, detail))
    }

    /// 计算入账后的存款余额，不修改状态
    pub fn deposit_after(&self, detail: &MessageDetail) -> Result<u128> {
        self.deposit(&detail.depositor, &detail.token)
            .checked_add(detail.amount)
            .ok_or(Error::ArithmeticOverflow("deposit"))
    }

    pub fn borrowing_after(&self, borrower: &Address, token: &Address, amount: u128) -> Result<u128> {
        self.borrowing(borrower, token)
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow("borrowing"))
    }

    pub(crate) fn commit_deposit(&mut self, message_id: MessageId, detail: MessageDetail, new_balance: u128) {
        self.deposits.insert((detail.depositor, detail.token), new_balance);
        self.message_details.insert(message_id, detail);
        self.last_received = Some(message_id);
    }

    pub(crate) fn commit_borrow(&mut self, message_id: MessageId, borrower: Address, token: Address, amount: u128, new_balance: u128) {
        self.borrowings.insert((borrower, token), new_balance);
        self.borrowed_against.insert(message_id, amount);
        self.outstanding.entry((borrower, token)).or_default().push(message_id);
    }

    /// 清零借款并把回执覆盖的消息标记为已结清
    pub(crate) fn settle(&mut self, borrower: &Address, token: &Address, released: &[MessageId]) {
        self.borrowings.remove(&(*borrower, *token));
        self.outstanding.remove(&(*borrower, *token));
        self.settled.extend(released.iter().copied());
    }
}
