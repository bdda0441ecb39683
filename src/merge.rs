//! Cross-GPO merge
//!
//! Combines the rules of an ordered list of GPOs, closest to the target
//! object first, into one deduplicated entry list per policy domain.
//!
//! ## Strategies
//!
//! - **Override**: the first GPO defining `domain/key` wins. Any later
//!   definition of that key is discarded, whatever its strategy.
//! - **Append**: enabled values are concatenated, highest priority first,
//!   one per line. Disabled append entries are ignored. A key already sealed
//!   by an override entry never receives appended values.
//!
//! Entries of each domain are returned sorted by key.

use std::collections::BTreeMap;

use crate::entry::{Entry, Gpo, Strategy};

/// Merges GPOs ordered from highest to lowest priority.
pub fn merge(gpos: &[Gpo]) -> BTreeMap<String, Vec<Entry>> {
    // BTreeMap keeps keys in ascending order for the output
    let mut dedup: BTreeMap<String, BTreeMap<String, Entry>> = BTreeMap::new();

    for gpo in gpos {
        for (domain, entries) in &gpo.rules {
            let kept = dedup.entry(domain.clone()).or_default();
            for e in entries {
                merge_entry(kept, e);
            }
        }
    }

    dedup
        .into_iter()
        .map(|(domain, entries)| (domain, entries.into_values().collect()))
        .collect()
}

/// Folds one lower priority entry into the entries kept so far for its domain.
fn merge_entry(kept: &mut BTreeMap<String, Entry>, e: &Entry) {
    let appending = e.strategy == Strategy::Append;
    if appending && e.disabled {
        return;
    }

    match kept.get_mut(&e.key) {
        None => {
            kept.insert(e.key.clone(), e.clone());
        }
        Some(closest) if appending && closest.strategy == Strategy::Append => {
            // Closest value first, its meta wins
            closest.value = format!("{}\n{}", closest.value, e.value);
        }
        // Sealed by a closer entry
        Some(_) => {}
    }
}
