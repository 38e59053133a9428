//! Instruction planning and ordering validation
//!
//! A transaction is assembled from three groups, always in this order:
//! 1. Provisioning: associated token account creations
//! 2. Memo (optional)
//! 3. Core: the transfer, or the aggregator's compute budget / setup /
//!    swap / cleanup instructions
//!
//! Creation and use of an account share one atomic transaction, so the
//! creation must come first. [`sanity_check_ix_order`] enforces that on the
//! flattened list.

use crate::tx_builder::errors::TransactionBuilderError;
use crate::types::TokenAmount;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
#[allow(deprecated)]
use solana_sdk::system_instruction;
use std::collections::HashSet;

/// SPL Memo program (v2)
pub const MEMO_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Longest memo accepted; keeps a single-transfer transaction under the packet limit
pub const MAX_MEMO_BYTES: usize = 566;

/// Ordered plan of instructions for one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionPlan {
    provisioning: Vec<Instruction>,
    memo: Option<Instruction>,
    core: Vec<Instruction>,
}

impl InstructionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_provisioning(&mut self, ix: Instruction) -> &mut Self {
        self.provisioning.push(ix);
        self
    }

    pub fn set_memo(&mut self, ix: Instruction) -> &mut Self {
        self.memo = Some(ix);
        self
    }

    pub fn push_core(&mut self, ix: Instruction) -> &mut Self {
        self.core.push(ix);
        self
    }

    pub fn provisioning(&self) -> &[Instruction] {
        &self.provisioning
    }

    pub fn memo(&self) -> Option<&Instruction> {
        self.memo.as_ref()
    }

    pub fn core(&self) -> &[Instruction] {
        &self.core
    }

    pub fn is_empty(&self) -> bool {
        self.provisioning.is_empty() && self.memo.is_none() && self.core.is_empty()
    }

    pub fn len(&self) -> usize {
        self.provisioning.len() + usize::from(self.memo.is_some()) + self.core.len()
    }

    /// Flatten into the on-chain order: provisioning, memo, core
    pub fn ordered(&self) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.provisioning.iter().cloned());
        out.extend(self.memo.iter().cloned());
        out.extend(self.core.iter().cloned());
        out
    }
}

/// Memo instruction signed by `signers`
pub fn memo_instruction(text: &str, signers: &[Pubkey]) -> Result<Instruction, TransactionBuilderError> {
    if text.is_empty() {
        return Err(TransactionBuilderError::instruction_failed("memo", "memo is empty"));
    }
    if text.len() > MAX_MEMO_BYTES {
        return Err(TransactionBuilderError::instruction_failed(
            "memo",
            format!("memo is {} bytes, limit is {}", text.len(), MAX_MEMO_BYTES),
        ));
    }

    Ok(Instruction {
        program_id: MEMO_PROGRAM_ID,
        accounts: signers
            .iter()
            .map(|signer| AccountMeta::new_readonly(*signer, true))
            .collect(),
        data: text.as_bytes().to_vec(),
    })
}

/// Append payment reference keys as read-only, non-signer accounts
fn with_references(mut ix: Instruction, references: &[Pubkey]) -> Instruction {
    ix.accounts
        .extend(references.iter().map(|r| AccountMeta::new_readonly(*r, false)));
    ix
}

/// System transfer of `lamports` from `from` to `to`
#[allow(deprecated)]
pub fn native_transfer(from: &Pubkey, to: &Pubkey, lamports: u64, references: &[Pubkey]) -> Instruction {
    with_references(system_instruction::transfer(from, to, lamports), references)
}

/// Accounts and amount for an SPL token transfer
#[derive(Debug, Clone)]
pub struct TokenTransfer<'a> {
    pub source: Pubkey,
    pub mint: Pubkey,
    pub destination: Pubkey,
    pub authority: Pubkey,
    pub amount: TokenAmount,
    pub references: &'a [Pubkey],
}

/// `transfer_checked` between two token accounts; the mint's decimals are
/// verified on-chain.
pub fn token_transfer(transfer: &TokenTransfer<'_>) -> Result<Instruction, TransactionBuilderError> {
    let ix = spl_token::instruction::transfer_checked(
        &spl_token::id(),
        &transfer.source,
        &transfer.mint,
        &transfer.destination,
        &transfer.authority,
        &[],
        transfer.amount.base_units(),
        transfer.amount.decimals(),
    )
    .map_err(|e| TransactionBuilderError::instruction_failed("spl_token", e.to_string()))?;

    Ok(with_references(ix, transfer.references))
}

fn is_account_creation(ix: &Instruction) -> bool {
    ix.program_id == spl_associated_token_account::id()
}

/// Validate the ordering rules on a flattened instruction list:
/// - the list is not empty
/// - an account is created at most once and before any other instruction uses it
/// - memos come before every instruction that is neither a creation nor a memo
pub fn sanity_check_ix_order(instructions: &[Instruction]) -> Result<(), TransactionBuilderError> {
    if instructions.is_empty() {
        return Err(TransactionBuilderError::invalid_order("Instruction list is empty"));
    }

    let mut created = HashSet::new();
    for (idx, ix) in instructions.iter().enumerate() {
        if !is_account_creation(ix) {
            continue;
        }
        let account = ix
            .accounts
            .get(1)
            .map(|meta| meta.pubkey)
            .ok_or_else(|| TransactionBuilderError::invalid_order(format!(
                "Account creation at position {} has no target account",
                idx
            )))?;

        if !created.insert(account) {
            return Err(TransactionBuilderError::invalid_order(format!(
                "Account {} is created more than once (again at position {})",
                account, idx
            )));
        }

        if let Some(pos) = instructions[..idx]
            .iter()
            .position(|earlier| earlier.accounts.iter().any(|meta| meta.pubkey == account))
        {
            return Err(TransactionBuilderError::invalid_order(format!(
                "Account {} is used at position {} before its creation at position {}",
                account, pos, idx
            )));
        }
    }

    let first_core = instructions
        .iter()
        .position(|ix| !is_account_creation(ix) && ix.program_id != MEMO_PROGRAM_ID);
    if let Some(first_core) = first_core {
        if let Some(late) = instructions[first_core..]
            .iter()
            .position(|ix| ix.program_id == MEMO_PROGRAM_ID)
        {
            return Err(TransactionBuilderError::invalid_order(format!(
                "Memo at position {} follows a value-moving instruction at position {}",
                first_core + late,
                first_core
            )));
        }
    }

    Ok(())
}
