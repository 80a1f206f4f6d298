use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;

use crate::{
    types::{DepositPayload, RepaymentPayload},
    Error, Result,
};

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bcs::to_bytes(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bcs::from_bytes(bytes).map_err(|e| Error::MalformedPayload(e.to_string()))
}

/// 解码存款载荷，拒绝零地址与零金额
pub fn decode_deposit(bytes: &[u8]) -> Result<DepositPayload> {
    let payload: DepositPayload = decode(bytes)?;
    if payload.depositor.is_zero() {
        return Err(Error::MalformedPayload("zero depositor address".to_string()));
    }
    if payload.token.is_zero() {
        return Err(Error::MalformedPayload("zero token address".to_string()));
    }
    if payload.amount == 0 {
        return Err(Error::MalformedPayload("zero deposit amount".to_string()));
    }
    Ok(payload)
}

pub fn decode_repayment(bytes: &[u8]) -> Result<RepaymentPayload> {
    let payload: RepaymentPayload = decode(bytes)?;
    if payload.recipient.is_zero() {
        return Err(Error::MalformedPayload("zero recipient address".to_string()));
    }
    if payload.released_message_ids.is_empty() {
        return Err(Error::MalformedPayload("receipt releases no messages".to_string()));
    }
    let mut seen = HashSet::new();
    if !payload.released_message_ids.iter().all(|id| seen.insert(*id)) {
        return Err(Error::MalformedPayload("duplicate released message id".to_string()));
    }
    Ok(payload)
}
