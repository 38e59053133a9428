//! Balance reads for the sender-side checks and the CLI

use crate::errors::WalletFlowError;
use crate::rpc_manager::{with_retry, LedgerRpc, RetryPolicy};
use crate::tx_builder::AddressResolver;
use crate::types::{Asset, TokenAmount};
use solana_sdk::{program_pack::Pack, pubkey::Pubkey};
use std::sync::Arc;

#[derive(Clone)]
pub struct Balances {
    rpc: Arc<dyn LedgerRpc>,
    resolver: Arc<AddressResolver>,
    retry: RetryPolicy,
}

impl Balances {
    pub fn new(rpc: Arc<dyn LedgerRpc>, resolver: Arc<AddressResolver>, retry: RetryPolicy) -> Self {
        Self { rpc, resolver, retry }
    }

    /// Lamports held by `owner`
    pub async fn native_balance(&self, owner: &Pubkey) -> Result<u64, WalletFlowError> {
        with_retry("get_balance", &self.retry, || self.rpc.get_balance(owner)).await
    }

    /// Base units of `asset` held by `owner`; 0 when the token account does not exist
    pub async fn token_balance(&self, owner: &Pubkey, asset: &Asset) -> Result<u64, WalletFlowError> {
        if asset.is_native() {
            return self.native_balance(owner).await;
        }

        let address = self.resolver.resolve(owner, &asset.mint());
        let account = with_retry("get_account_info", &self.retry, || {
            self.rpc.get_account_info(&address)
        })
        .await?;

        match account {
            None => Ok(0),
            Some(account) => spl_token::state::Account::unpack(&account.data)
                .map(|state| state.amount)
                .map_err(|e| {
                    WalletFlowError::invalid_input(format!("{} is not a token account: {}", address, e))
                }),
        }
    }

    /// Balance as an amount carrying the asset's decimals
    pub async fn balance_of(&self, owner: &Pubkey, asset: &Asset) -> Result<TokenAmount, WalletFlowError> {
        let units = self.token_balance(owner, asset).await?;
        Ok(TokenAmount::from_base_units(units, asset.decimals()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeLedger;

    fn balances(ledger: Arc<FakeLedger>, resolver: Arc<AddressResolver>) -> Balances {
        Balances::new(ledger, resolver, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_native_balance() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        ledger.set_balance(owner, 2_500_000_000);

        let b = balances(ledger, Arc::new(AddressResolver::new()));
        assert_eq!(b.native_balance(&owner).await.unwrap(), 2_500_000_000);
        assert_eq!(b.balance_of(&owner, &Asset::Native).await.unwrap().to_string(), "2.5");
    }

    #[tokio::test]
    async fn test_token_balance_reads_account_or_zero() {
        let ledger = Arc::new(FakeLedger::new());
        let resolver = Arc::new(AddressResolver::new());
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let asset = Asset::token(mint, 6);
        let b = balances(ledger.clone(), resolver.clone());

        assert_eq!(b.token_balance(&owner, &asset).await.unwrap(), 0);

        ledger.add_token_account(resolver.resolve(&owner, &mint), mint, owner, 1_250_000);
        assert_eq!(b.token_balance(&owner, &asset).await.unwrap(), 1_250_000);
        assert_eq!(b.balance_of(&owner, &asset).await.unwrap().to_string(), "1.25");
    }
}
