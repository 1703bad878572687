//! New-versus-recorded partition of a scrape against the store's newest rows.

use std::collections::HashSet;

use insider_core::{IdentityKey, InsiderTrade, StoredRow};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Trades absent from the sample, in scrape order (newest first).
    pub new_trades: Vec<InsiderTrade>,
    pub duplicates: usize,
}

pub fn existing_keys(existing: &[StoredRow]) -> HashSet<IdentityKey> {
    existing.iter().map(IdentityKey::from_row).collect()
}

/// Keep the scraped trades whose identity key is not already in `existing`.
///
/// Only the sample is consulted: two equal trades inside `scraped` both pass.
/// Prepending the result as-is reproduces the source ordering in the store.
pub fn merge_new_trades(scraped: &[InsiderTrade], existing: &[StoredRow]) -> MergeOutcome {
    let known = existing_keys(existing);
    let new_trades: Vec<InsiderTrade> = scraped
        .iter()
        .filter(|trade| !known.contains(&trade.identity_key()))
        .cloned()
        .collect();
    MergeOutcome {
        duplicates: scraped.len() - new_trades.len(),
        new_trades,
    }
}
