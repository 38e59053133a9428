//! Core TransactionBuilder implementation
//!
//! Turns an [`InstructionPlan`] into an [`UnsignedTransaction`]: one fresh
//! freshness token per build (fetched through the retry helper), ordering
//! validation, optional address lookup table resolution, and v0 message
//! compilation.

use super::errors::TransactionBuilderError;
use super::instructions::{sanity_check_ix_order, InstructionPlan};
use super::output::UnsignedTransaction;
use crate::errors::WalletFlowError;
use crate::rpc_manager::{with_retry, LedgerRpc, RetryPolicy};
use solana_sdk::{
    address_lookup_table::state::AddressLookupTable,
    message::{v0::Message as MessageV0, AddressLookupTableAccount, VersionedMessage},
    pubkey::Pubkey,
};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct TransactionBuilder {
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryPolicy,
}

impl TransactionBuilder {
    pub fn new(rpc: Arc<dyn LedgerRpc>, retry: RetryPolicy) -> Self {
        Self { rpc, retry }
    }

    /// Build a transaction from `plan` with `fee_payer` paying fees
    pub async fn build(
        &self,
        plan: &InstructionPlan,
        fee_payer: &Pubkey,
    ) -> Result<UnsignedTransaction, WalletFlowError> {
        self.build_with_lookup_tables(plan, fee_payer, &[]).await
    }

    /// Same as [`build`](Self::build), compressing account keys through the
    /// given address lookup tables.
    #[instrument(skip(self, plan), fields(instructions = plan.len(), lookup_tables = lookup_tables.len()))]
    pub async fn build_with_lookup_tables(
        &self,
        plan: &InstructionPlan,
        fee_payer: &Pubkey,
        lookup_tables: &[Pubkey],
    ) -> Result<UnsignedTransaction, WalletFlowError> {
        let instructions = plan.ordered();
        sanity_check_ix_order(&instructions)?;

        let tables = self.load_lookup_tables(lookup_tables).await?;

        let freshness = with_retry("get_latest_blockhash", &self.retry, || {
            self.rpc.get_latest_blockhash()
        })
        .await?;

        let message = MessageV0::try_compile(fee_payer, &instructions, &tables, freshness.blockhash)
            .map_err(TransactionBuilderError::from)?;

        debug!(
            fee_payer = %fee_payer,
            blockhash = %freshness.blockhash,
            last_valid_block_height = freshness.last_valid_block_height,
            "Compiled transaction"
        );

        Ok(UnsignedTransaction::new(
            VersionedMessage::V0(message),
            *fee_payer,
            freshness,
        ))
    }

    async fn load_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, WalletFlowError> {
        let mut tables = Vec::with_capacity(addresses.len());
        for address in addresses {
            let account = with_retry("get_account_info", &self.retry, || {
                self.rpc.get_account_info(address)
            })
            .await?
            .ok_or_else(|| TransactionBuilderError::lookup_table(address, "account not found"))?;

            let table = AddressLookupTable::deserialize(&account.data)
                .map_err(|e| TransactionBuilderError::lookup_table(address, e.to_string()))?;

            tables.push(AddressLookupTableAccount {
                key: *address,
                addresses: table.addresses.to_vec(),
            });
        }
        Ok(tables)
    }
}
