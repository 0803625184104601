//! Differences between two resolution results

use crate::models::{Change, ResolutionResult, ResolvedInstance};
use std::collections::{HashMap, HashSet, VecDeque};

/// Compare two results of the same cache key
///
/// Results are compared as sets, so order and repetition do not matter. An
/// instance that is new in `next` counts as an update when an instance that
/// disappeared from `previous` had the same network and address; `updated`
/// carries the newer value. Returns the change and whether anything changed
/// at all.
pub fn default_diff(
    cache_key: &str,
    previous: &ResolutionResult,
    next: &ResolutionResult,
) -> (Change, bool) {
    let before: HashSet<&ResolvedInstance> = previous.instances.iter().collect();
    let after: HashSet<&ResolvedInstance> = next.instances.iter().collect();

    let mut change = Change {
        cache_key: cache_key.to_string(),
        result: next.clone(),
        ..Default::default()
    };
    if before == after {
        return (change, false);
    }

    // Disappeared instances per endpoint, oldest first
    let mut vanished: HashMap<(&str, &str), VecDeque<&ResolvedInstance>> = HashMap::new();
    let mut seen = HashSet::new();
    for instance in previous.instances.iter().filter(|i| !after.contains(i)) {
        if seen.insert(instance) {
            vanished
                .entry(endpoint_key(instance))
                .or_default()
                .push_back(instance);
        }
    }

    let mut seen = HashSet::new();
    for instance in next.instances.iter().filter(|i| !before.contains(i)) {
        if !seen.insert(instance) {
            continue;
        }
        let replaced = vanished
            .get_mut(&endpoint_key(instance))
            .and_then(VecDeque::pop_front);
        match replaced {
            Some(_) => change.updated.push(instance.clone()),
            None => change.added.push(instance.clone()),
        }
    }

    for instance in &previous.instances {
        if let Some(rest) = vanished.remove(&endpoint_key(instance)) {
            change.removed.extend(rest.into_iter().cloned());
        }
    }

    (change, true)
}

fn endpoint_key(instance: &ResolvedInstance) -> (&str, &str) {
    (instance.network.as_str(), instance.address.as_str())
}
