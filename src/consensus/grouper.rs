//! Grade Grouper - Partitions an item's observations by grade

use std::collections::BTreeMap;

use crate::types::{Grade, PriceObservation};

/// Observations sharing one grade, in input order
pub type GradeGroup<'a> = Vec<&'a PriceObservation>;

/// Partition observations by normalized grade.
///
/// Every observation lands in exactly one group. Nothing is filtered or
/// deduplicated, and the map is ordered so iteration is deterministic.
pub fn group_by_grade(observations: &[PriceObservation]) -> BTreeMap<Grade, GradeGroup<'_>> {
    let mut groups: BTreeMap<Grade, GradeGroup<'_>> = BTreeMap::new();

    for observation in observations {
        groups
            .entry(observation.grade.normalized())
            .or_default()
            .push(observation);
    }

    groups
}
