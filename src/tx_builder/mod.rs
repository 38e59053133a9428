//! Transaction Builder
//!
//! - **address**: associated token account resolution (memoized)
//! - **provisioner**: lazy creation of missing token accounts
//! - **instructions**: instruction planning, memo/transfer constructors, ordering checks
//! - **builder**: freshness token fetch, lookup tables, v0 compilation
//! - **output**: unsigned transaction wire form and signed payload checks
//! - **errors**: build-layer error taxonomy
//!
//! Instruction order inside one transaction is always
//! provisioning → memo → transfer/swap.

pub mod errors;
pub use errors::TransactionBuilderError;

pub mod address;
pub mod builder;
pub mod instructions;
pub mod output;
pub mod provisioner;

pub use address::AddressResolver;
pub use builder::TransactionBuilder;
pub use instructions::{
    memo_instruction, native_transfer, sanity_check_ix_order, token_transfer, InstructionPlan,
    TokenTransfer, MAX_MEMO_BYTES, MEMO_PROGRAM_ID,
};
pub use output::{SignedTransaction, UnsignedTransaction};
pub use provisioner::{AccountProvisioner, ProvisionedAccount};
