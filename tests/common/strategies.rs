//! Proptest strategies for unit topologies.

use proptest::prelude::*;

/// One generated unit: whether `start()` fails, its rank, and the indices of
/// earlier units it depends on
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub fails: bool,
    pub rank: i32,
    pub dependencies: Vec<usize>,
}

pub fn unit_name(index: usize) -> String {
    format!("unit_{index}")
}

/// Up to `max_units` units; each may depend on any unit generated before it
pub fn topology_strategy(max_units: usize) -> impl Strategy<Value = Vec<UnitSpec>> {
    prop::collection::vec(
        (
            prop::bool::weighted(0.25),
            0i32..5,
            prop::collection::vec(any::<prop::sample::Index>(), 0..3),
        ),
        1..=max_units,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(index, (fails, rank, picks))| {
                let mut dependencies: Vec<usize> = if index == 0 {
                    Vec::new()
                } else {
                    picks.iter().map(|pick| pick.index(index)).collect()
                };
                dependencies.sort_unstable();
                dependencies.dedup();
                UnitSpec {
                    fails,
                    rank: rank * 10,
                    dependencies,
                }
            })
            .collect()
    })
}
