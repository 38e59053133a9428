//! Error types for the transaction builder
//!
//! Covers instruction construction, ordering validation, message compilation
//! and serialization. Ledger access failures are not represented here: they
//! surface through the retry helper as `WalletFlowError`.

use solana_sdk::message::CompileError;
use thiserror::Error;

/// Error type for all transaction builder operations
#[derive(Error, Debug)]
pub enum TransactionBuilderError {
    /// Failed to build an instruction for a specific program
    ///
    /// Contains the program ID and detailed reason for failure
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program ID that failed to build an instruction
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// Invalid instruction order or structure
    ///
    /// Every account creation must precede the first instruction that
    /// touches the created account, and the memo precedes value-moving
    /// instructions.
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Message compilation failed (too many accounts, bad lookup tables)
    #[error("Message compile error: {0}")]
    Compile(String),

    /// An address lookup table could not be loaded or decoded
    #[error("Lookup table {address}: {reason}")]
    LookupTable { address: String, reason: String },

    /// Transaction bytes could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation or unexpected state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransactionBuilderError {
    /// Error category for metrics labels
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstructionBuild { .. } => "build_instruction",
            Self::InvalidInstructionOrder(_) => "build_order",
            Self::Compile(_) => "build_compile",
            Self::LookupTable { .. } => "build_lookup_table",
            Self::Serialization(_) => "build_serialization",
            Self::Internal(_) => "build_internal",
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    /// Create an instruction build error for a specific program
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid instruction order error
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }

    pub fn lookup_table(address: impl ToString, reason: impl Into<String>) -> Self {
        Self::LookupTable {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<CompileError> for TransactionBuilderError {
    fn from(err: CompileError) -> Self {
        Self::Compile(err.to_string())
    }
}

impl From<bincode::Error> for TransactionBuilderError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
