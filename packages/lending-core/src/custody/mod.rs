use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{types::Address, Error, Result};

/// 同质化代币托管接口。账本只记录账目，余额由该接口维护
pub trait TokenCustody: Send + Sync {
    fn token(&self) -> Address;

    fn symbol(&self) -> &str;

    fn total_supply(&self) -> u128;

    fn balance_of(&self, owner: &Address) -> u128;

    fn allowance(&self, owner: &Address, spender: &Address) -> u128;

    fn approve(&mut self, owner: Address, spender: Address, amount: u128);

    fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<()>;

    /// 仅检查 `transfer_from` / `burn_from` 能否成功，不修改状态
    fn check_spend(&self, spender: &Address, from: &Address, amount: u128) -> Result<()>;

    fn transfer_from(&mut self, spender: Address, from: Address, to: Address, amount: u128) -> Result<()>;

    fn mint(&mut self, minter: Address, to: Address, amount: u128) -> Result<()>;

    fn burn_from(&mut self, spender: Address, from: Address, amount: u128) -> Result<()>;
}

pub type SharedCustody = Arc<RwLock<dyn TokenCustody>>;

/// 内存代币，用作借款代币、抵押代币与手续费代币
pub struct MockToken {
    address: Address,
    symbol: String,
    minter: Option<Address>,
    total_supply: u128,
    balances: HashMap<Address, u128>,
    allowances: HashMap<(Address, Address), u128>,
}

impl MockToken {
    pub fn new(address: Address, symbol: &str, minter: Option<Address>) -> Self {
        Self {
            address,
            symbol: symbol.to_string(),
            minter,
            total_supply: 0,
            balances: HashMap::new(),
            allowances: HashMap::new(),
        }
    }

    pub fn shared(self) -> Arc<RwLock<MockToken>> {
        Arc::new(RwLock::new(self))
    }

    /// 水龙头发放，不检查铸币权限
    pub fn drip(&mut self, to: Address, amount: u128) -> Result<()> {
        self.credit(to, amount)
    }

    fn credit(&mut self, to: Address, amount: u128) -> Result<()> {
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow("token supply"))?;
        let balance = self.balances.entry(to).or_default();
        *balance = balance.checked_add(amount).ok_or(Error::ArithmeticOverflow("token balance"))?;
        self.total_supply = supply;
        Ok(())
    }

    fn check_balance(&self, owner: &Address, amount: u128) -> Result<()> {
        let available = self.balance_of(owner);
        if available < amount {
            return Err(Error::InsufficientBalance {
                required: amount,
                available,
            });
        }
        Ok(())
    }

    fn spend_allowance(&mut self, spender: Address, from: Address, amount: u128) {
        // owner 自己花费时不消耗授权
        if spender == from {
            return;
        }
        if let Some(allowance) = self.allowances.get_mut(&(from, spender)) {
            *allowance -= amount;
        }
    }
}

impl TokenCustody for MockToken {
    fn token(&self) -> Address {
        self.address
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn total_supply(&self) -> u128 {
        self.total_supply
    }

    fn balance_of(&self, owner: &Address) -> u128 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    fn approve(&mut self, owner: Address, spender: Address, amount: u128) {
        self.allowances.insert((owner, spender), amount);
    }

    fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<()> {
        self.check_balance(&from, amount)?;
        if let Some(balance) = self.balances.get_mut(&from) {
            *balance -= amount;
        }
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }

    fn check_spend(&self, spender: &Address, from: &Address, amount: u128) -> Result<()> {
        if spender != from {
            let available = self.allowance(from, spender);
            if available < amount {
                return Err(Error::InsufficientAllowance {
                    required: amount,
                    available,
                });
            }
        }
        self.check_balance(from, amount)
    }

    fn transfer_from(&mut self, spender: Address, from: Address, to: Address, amount: u128) -> Result<()> {
        self.check_spend(&spender, &from, amount)?;
        self.spend_allowance(spender, from, amount);
        self.transfer(from, to, amount)
    }

    fn mint(&mut self, minter: Address, to: Address, amount: u128) -> Result<()> {
        if let Some(expected) = self.minter {
            if expected != minter {
                return Err(Error::Unauthorized(format!("{} is not the minter of {}", minter, self.symbol)));
            }
        }
        self.credit(to, amount)
    }

    fn burn_from(&mut self, spender: Address, from: Address, amount: u128) -> Result<()> {
        self.check_spend(&spender, &from, amount)?;
        self.spend_allowance(spender, from, amount);
        if let Some(balance) = self.balances.get_mut(&from) {
            *balance -= amount;
        }
        self.total_supply -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> (MockToken, Address, Address) {
        let protocol = Address::from_label("ledger");
        let user = Address::from_label("depositor");
        (MockToken::new(Address::from_label("usdc"), "mUSDC", Some(protocol)), protocol, user)
    }

    #[test]
    fn test_only_minter_can_mint() {
        let (mut token, protocol, user) = usdc();
        assert!(matches!(token.mint(user, user, 10), Err(Error::Unauthorized(_))));
        token.mint(protocol, user, 10).unwrap();
        assert_eq!(token.balance_of(&user), 10);
        assert_eq!(token.total_supply(), 10);
    }

    #[test]
    fn test_burn_from_requires_allowance() {
        let (mut token, protocol, user) = usdc();
        token.mint(protocol, user, 135).unwrap();

        let err = token.burn_from(protocol, user, 135).unwrap_err();
        assert!(matches!(err, Error::InsufficientAllowance { required: 135, available: 0 }));

        token.approve(user, protocol, 135);
        token.burn_from(protocol, user, 135).unwrap();
        assert_eq!(token.balance_of(&user), 0);
        assert_eq!(token.total_supply(), 0);
        assert_eq!(token.allowance(&user, &protocol), 0);
    }

    #[test]
    fn test_burn_from_requires_balance() {
        let (mut token, protocol, user) = usdc();
        token.mint(protocol, user, 5).unwrap();
        token.approve(user, protocol, 100);
        assert!(matches!(
            token.burn_from(protocol, user, 100),
            Err(Error::InsufficientBalance { required: 100, available: 5 })
        ));
        // 失败不修改状态
        assert_eq!(token.balance_of(&user), 5);
        assert_eq!(token.allowance(&user, &protocol), 100);
    }

    #[test]
    fn test_transfer_from_moves_balance() {
        let (mut token, _, user) = usdc();
        let relay = Address::from_label("origin-relay");
        token.drip(user, 50).unwrap();
        token.approve(user, relay, 20);
        token.transfer_from(relay, user, relay, 20).unwrap();
        assert_eq!(token.balance_of(&user), 30);
        assert_eq!(token.balance_of(&relay), 20);
        assert!(token.transfer_from(relay, user, relay, 1).is_err());
    }
}
