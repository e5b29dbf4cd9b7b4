//! Identifier allocation for one image's container collection.
//!
//! Ids are 1-based and contiguous by construction: the next id is always
//! `len + 1`, and [`compact`] renumbers survivors after deletions so the
//! key set is exactly `{1..=len}` again.

use std::collections::BTreeMap;

use fleet_common::{FleetError, Result};

use crate::image::ContainerRecord;

/// Inclusive 1-based id range.
pub type IdRange = (u32, u32);

pub fn next_id(containers: &BTreeMap<u32, ContainerRecord>) -> u32 {
    containers.len() as u32 + 1
}

/// Renumber surviving containers to `1..=len`, preserving relative order by
/// previous id. Each record's `id` field is updated to match its new key.
pub fn compact(containers: &mut BTreeMap<u32, ContainerRecord>) {
    let old = std::mem::take(containers);
    // BTreeMap yields old keys in ascending order.
    for (new_id, (_, mut record)) in (1u32..).zip(old) {
        record.id = new_id;
        containers.insert(new_id, record);
    }
}

/// Validate a whole range set up front. A single malformed pair rejects the
/// entire set so no partial deletion happens from a bad request.
pub fn validate_ranges(ranges: &[IdRange]) -> Result<()> {
    for &(start, end) in ranges {
        if start == 0 || end == 0 {
            return Err(FleetError::FormatError(format!(
                "range start and end must be positive: {start}-{end}"
            )));
        }
        if start > end {
            return Err(FleetError::FormatError(format!(
                "range start cannot exceed range end: {start}-{end}"
            )));
        }
    }
    Ok(())
}

/// Expand validated ranges into individual ids, in request order.
pub fn expand_ranges(ranges: &[IdRange]) -> Vec<u32> {
    ranges
        .iter()
        .flat_map(|&(start, end)| start..=end)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32) -> ContainerRecord {
        ContainerRecord {
            id,
            flag: format!("flag{{{id}}}"),
            outer_port: 10000 + id as u16,
            runtime_ref: format!("ref-{id}"),
        }
    }

    fn map_of(ids: &[u32]) -> BTreeMap<u32, ContainerRecord> {
        ids.iter().map(|&i| (i, record(i))).collect()
    }

    #[test]
    fn next_id_is_len_plus_one() {
        assert_eq!(next_id(&map_of(&[])), 1);
        assert_eq!(next_id(&map_of(&[1, 2, 3])), 4);
    }

    #[test]
    fn compact_closes_gaps_preserving_order() {
        let mut containers = map_of(&[1, 3, 7]);
        let old_flags: Vec<String> = containers.values().map(|c| c.flag.clone()).collect();

        compact(&mut containers);

        let keys: Vec<u32> = containers.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3]);
        for (key, record) in &containers {
            assert_eq!(*key, record.id);
        }
        // Relative order by previous id survives.
        let new_flags: Vec<String> = containers.values().map(|c| c.flag.clone()).collect();
        assert_eq!(old_flags, new_flags);
    }

    #[test]
    fn compact_on_empty_is_noop() {
        let mut containers = map_of(&[]);
        compact(&mut containers);
        assert!(containers.is_empty());
    }

    #[test]
    fn invariant_holds_over_mixed_operations() {
        let mut containers = map_of(&[]);
        for _ in 0..5 {
            let id = next_id(&containers);
            containers.insert(id, record(id));
        }
        containers.remove(&2);
        containers.remove(&4);
        compact(&mut containers);
        assert_eq!(containers.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);

        let id = next_id(&containers);
        assert_eq!(id, 4);
        containers.insert(id, record(id));
        containers.remove(&1);
        compact(&mut containers);
        assert_eq!(containers.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        for (key, record) in &containers {
            assert_eq!(*key, record.id);
        }
    }

    #[test]
    fn malformed_ranges_reject_the_whole_set() {
        assert!(validate_ranges(&[(1, 2), (0, 5)]).is_err());
        assert!(validate_ranges(&[(5, 3)]).is_err());
        assert!(validate_ranges(&[(1, 1), (2, 4)]).is_ok());
    }

    #[test]
    fn expansion_is_inclusive_and_ordered() {
        assert_eq!(expand_ranges(&[(2, 4), (1, 1)]), vec![2, 3, 4, 1]);
    }
}
