//! Reverse dependency queries over the registry's reference records.
//!
//! The dependency relation is derived, never stored: document A depends on
//! document B when one of A's outgoing references resolved to a symbol
//! owned by B. Both queries below scan the registry on demand, which keeps
//! the invalidation algorithm trivially consistent with whatever the linker
//! last recorded.

use std::collections::HashSet;

use url::Url;

use crate::registry::DocumentRegistry;

/// Documents with at least one reference resolved into `targets`,
/// excluding the targets themselves.
pub fn dependents_of<T>(registry: &DocumentRegistry<T>, targets: &HashSet<Url>) -> Vec<Url> {
    registry
        .documents()
        .filter(|doc| !targets.contains(doc.uri()))
        .filter(|doc| {
            doc.outgoing_references()
                .is_some_and(|records| {
                    records
                        .iter()
                        .any(|record| record.resolved_uri().is_some_and(|uri| targets.contains(uri)))
                })
        })
        .map(|doc| doc.uri().clone())
        .collect()
}

/// Documents whose last linking attempt recorded at least one error. A
/// workspace change may have made those references resolvable, so they are
/// candidates for relinking even without a recorded dependency edge.
pub fn documents_with_link_errors<T>(registry: &DocumentRegistry<T>) -> Vec<Url> {
    registry
        .documents()
        .filter(|doc| doc.has_link_errors())
        .map(|doc| doc.uri().clone())
        .collect()
}
