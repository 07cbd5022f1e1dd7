//! Deterministic merge of per-unit payloads.

use std::collections::HashSet;

use timeweave_domain::model::{CallOutcome, EventItem};

use super::types::BatchCounters;

/// Tallies `outcomes` (already in unit order) and merges their payloads.
///
/// Payloads are concatenated in unit order, the first item seen for each
/// (title, timestamp, location) wins, and the result is stably sorted by
/// timestamp. Failures and timeouts contribute nothing.
pub(crate) fn merge_outcomes(
    outcomes: impl IntoIterator<Item = CallOutcome>,
) -> (Vec<EventItem>, BatchCounters) {
    let mut counters = BatchCounters::default();
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for outcome in outcomes {
        counters.attempted += 1;
        match outcome {
            CallOutcome::Success { items: payload, .. } => {
                counters.succeeded += 1;
                for item in payload {
                    if seen.insert(item.merge_key()) {
                        items.push(item);
                    }
                }
            }
            CallOutcome::Failure { .. } => counters.failed += 1,
            CallOutcome::Timeout { .. } => counters.timed_out += 1,
        }
    }

    items.sort_by_key(|item| item.timestamp);
    (items, counters)
}
