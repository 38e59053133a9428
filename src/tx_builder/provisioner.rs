//! Lazy creation of associated token accounts
//!
//! [`AccountProvisioner::ensure`] answers "where does this owner's balance of
//! this mint live, and does the account have to be created first?". It never
//! sends anything; the creation instruction is returned to the caller so it
//! lands in the same atomic transaction as the transfer that needs it.

use super::address::AddressResolver;
use crate::errors::WalletFlowError;
use crate::rpc_manager::{with_retry, LedgerRpc, RetryPolicy};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use spl_associated_token_account::instruction::create_associated_token_account;
use std::sync::Arc;
use tracing::debug;

/// Result of [`AccountProvisioner::ensure`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedAccount {
    pub owner: Pubkey,
    pub mint: Pubkey,
    pub address: Pubkey,
    /// Present when the account does not exist on-chain yet
    pub create_instruction: Option<Instruction>,
}

impl ProvisionedAccount {
    pub fn is_missing(&self) -> bool {
        self.create_instruction.is_some()
    }
}

#[derive(Clone)]
pub struct AccountProvisioner {
    rpc: Arc<dyn LedgerRpc>,
    resolver: Arc<AddressResolver>,
    retry: RetryPolicy,
}

impl AccountProvisioner {
    pub fn new(rpc: Arc<dyn LedgerRpc>, resolver: Arc<AddressResolver>, retry: RetryPolicy) -> Self {
        Self { rpc, resolver, retry }
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// Whether any account data exists at `address`
    pub async fn exists(&self, address: &Pubkey) -> Result<bool, WalletFlowError> {
        let account = with_retry("get_account_info", &self.retry, || {
            self.rpc.get_account_info(address)
        })
        .await?;
        Ok(account.is_some())
    }

    /// Resolve the owner's token account for `mint` and, when it is absent,
    /// produce the instruction creating it with `payer` funding the rent.
    pub async fn ensure(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        payer: &Pubkey,
    ) -> Result<ProvisionedAccount, WalletFlowError> {
        let address = self.resolver.resolve(owner, mint);
        let exists = self.exists(&address).await?;

        debug!(
            owner = %owner,
            mint = %mint,
            address = %address,
            exists,
            "Resolved token account"
        );

        let create_instruction =
            (!exists).then(|| create_associated_token_account(payer, owner, mint, &spl_token::id()));

        Ok(ProvisionedAccount {
            owner: *owner,
            mint: *mint,
            address,
            create_instruction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeLedger;

    fn provisioner(ledger: Arc<FakeLedger>) -> AccountProvisioner {
        AccountProvisioner::new(ledger, Arc::new(AddressResolver::new()), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_ensure_missing_account_yields_create_instruction() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        let provisioned = provisioner(ledger).ensure(&owner, &mint, &payer).await.unwrap();

        let ix = provisioned.create_instruction.expect("missing account needs creation");
        assert_eq!(ix.program_id, spl_associated_token_account::id());
        assert_eq!(ix.accounts[0].pubkey, payer);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[1].pubkey, provisioned.address);
        assert_eq!(ix.accounts[2].pubkey, owner);
        assert_eq!(ix.accounts[3].pubkey, mint);
    }

    #[tokio::test]
    async fn test_ensure_existing_account_yields_nothing() {
        let ledger = Arc::new(FakeLedger::new());
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let address = AddressResolver::new().resolve(&owner, &mint);
        ledger.add_token_account(address, mint, owner, 10);

        let provisioned = provisioner(ledger).ensure(&owner, &mint, &owner).await.unwrap();
        assert_eq!(provisioned.address, address);
        assert!(!provisioned.is_missing());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_until_account_lands() {
        let ledger = Arc::new(FakeLedger::new());
        let provisioner = provisioner(ledger.clone());
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        let first = provisioner.ensure(&owner, &mint, &owner).await.unwrap();
        let second = provisioner.ensure(&owner, &mint, &owner).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_missing());

        ledger.add_token_account(first.address, mint, owner, 0);
        let third = provisioner.ensure(&owner, &mint, &owner).await.unwrap();
        assert!(!third.is_missing());
    }
}
