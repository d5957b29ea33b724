use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::attributes::{AttributeSet, STREAM_OVERFLOW_ATTRIBUTES};

/// Picks the cell key a measurement with `attrs` should be recorded under.
///
/// A `limit` of `0` means unlimited. Otherwise a new attribute set is only
/// admitted while fewer than `limit - 1` cells exist, the last slot being
/// kept for the overflow cell. Existing cells are never evicted.
pub(crate) fn resolve<V, S>(
    attrs: AttributeSet,
    cells: &HashMap<AttributeSet, V, S>,
    limit: usize,
) -> AttributeSet
where
    S: BuildHasher,
{
    if limit == 0 || cells.contains_key(&attrs) {
        return attrs;
    }

    if cells.len() >= limit.saturating_sub(1) {
        return STREAM_OVERFLOW_ATTRIBUTES.clone();
    }

    attrs
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use opentelemetry::KeyValue;
    use rstest::rstest;

    use super::resolve;
    use crate::attributes::{AttributeSet, AttributeSetHasherBuilder, STREAM_OVERFLOW_ATTRIBUTES};

    fn set(i: i64) -> AttributeSet {
        AttributeSet::from(&[KeyValue::new("id", i)][..])
    }

    fn cells(n: i64) -> HashMap<AttributeSet, (), AttributeSetHasherBuilder> {
        let mut cells = HashMap::with_hasher(AttributeSetHasherBuilder);
        for i in 0..n {
            cells.insert(set(i), ());
        }
        cells
    }

    #[rstest]
    #[case::unlimited(0, 100, false)]
    #[case::room_left(3, 1, false)]
    #[case::last_slot_reserved(3, 2, true)]
    #[case::limit_of_one(1, 0, true)]
    fn new_attribute_sets(#[case] limit: usize, #[case] existing: i64, #[case] overflows: bool) {
        let cells = cells(existing);
        let resolved = resolve(set(1_000), &cells, limit);

        assert_eq!(resolved == *STREAM_OVERFLOW_ATTRIBUTES, overflows);
    }

    #[test]
    fn existing_cells_are_kept_when_full() {
        let cells = cells(5);
        assert_eq!(resolve(set(4), &cells, 2), set(4));
    }

    #[test]
    fn overflow_cell_is_reused() {
        let mut cells = cells(1);
        cells.insert(STREAM_OVERFLOW_ATTRIBUTES.clone(), ());

        assert_eq!(resolve(set(7), &cells, 2), *STREAM_OVERFLOW_ATTRIBUTES);
        assert_eq!(
            resolve(STREAM_OVERFLOW_ATTRIBUTES.clone(), &cells, 2),
            *STREAM_OVERFLOW_ATTRIBUTES
        );
    }
}
