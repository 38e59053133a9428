//! Associated token account resolution
//!
//! `(owner, mint)` maps to exactly one associated token account under the
//! SPL token program. The mapping is pure, so results are memoized for the
//! lifetime of the resolver.

use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address_with_program_id;

#[derive(Debug, Default)]
pub struct AddressResolver {
    cache: DashMap<(Pubkey, Pubkey), Pubkey>,
}

impl AddressResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associated token account of `owner` for `mint`
    pub fn resolve(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        *self
            .cache
            .entry((*owner, *mint))
            .or_insert_with(|| {
                get_associated_token_address_with_program_id(owner, mint, &spl_token::id())
            })
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
