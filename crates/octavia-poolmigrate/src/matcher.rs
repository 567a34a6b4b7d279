//! Migration candidate selection.
//!
//! Pure logic over a pool snapshot: no control-plane calls.

use octavia_api::{Listener, Pool, Protocol};

/// What to do for one listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Every named pool of the listener already uses the target protocol.
    NothingToMigrate,
    /// More than one pool needs migrating; the listener is skipped.
    Ambiguous { pool_ids: Vec<String> },
    /// Exactly one pool needs migrating.
    Migrate {
        source: Pool,
        /// A pool with the same name already using the target protocol.
        existing_target: Option<Pool>,
    },
}

/// Selects the pool of `listener` that needs migrating to `target`.
///
/// A pool is a candidate when it is associated with the listener, has a
/// non-empty name and a protocol other than `target`.
pub fn select_migration_targets(
    listener: &Listener,
    all_pools: &[Pool],
    target: &Protocol,
) -> Selection {
    let candidates: Vec<&Pool> = all_pools
        .iter()
        .filter(|p| p.is_bound_to(&listener.id))
        .filter(|p| p.protocol != *target && !p.name.is_empty())
        .collect();

    match candidates.as_slice() {
        [] => Selection::NothingToMigrate,
        [source] => Selection::Migrate {
            source: (*source).clone(),
            existing_target: find_target(all_pools, &source.name, target).cloned(),
        },
        many => Selection::Ambiguous {
            pool_ids: many.iter().map(|p| p.id.clone()).collect(),
        },
    }
}

/// Returns the pool named `name` that uses `target`. When several match,
/// the last one in list order wins.
pub fn find_target<'a>(pools: &'a [Pool], name: &str, target: &Protocol) -> Option<&'a Pool> {
    pools
        .iter()
        .rev()
        .find(|p| p.name == name && p.protocol == *target)
}
