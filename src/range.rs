use thiserror::Error;

/// A closed interval `[min, max]` of file offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub min: u64,
    pub max: u64,
}

/// Returned by [`RangeSet::intersection`] when no positions are shared.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The intersection was empty.")]
pub struct EmptyIntersection;

/// An ordered set of disjoint closed intervals.
///
/// Consecutive intervals always satisfy `a.max + 1 < b.min`; anything closer
/// would have been merged. Sets are immutable, and every operation returns a
/// new set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    pub fn singleton(min: u64, max: u64) -> RangeSet {
        RangeSet {
            ranges: vec![Range { min, max }],
        }
    }

    /// Merges the two interval lists, combining intervals that overlap or
    /// touch (`a.max + 1 >= b.min`).
    pub fn union(&self, other: &RangeSet) -> RangeSet {
        let mut merged = Vec::with_capacity(self.ranges.len() + other.ranges.len());
        let mut a = self.ranges.iter().peekable();
        let mut b = other.ranges.iter().peekable();
        loop {
            let take_a = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => x.min <= y.min,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_a {
                merged.push(*a.next().unwrap());
            } else {
                merged.push(*b.next().unwrap());
            }
        }

        let mut ranges: Vec<Range> = Vec::with_capacity(merged.len());
        for range in merged {
            match ranges.last_mut() {
                Some(last) if range.min <= last.max.saturating_add(1) => {
                    last.max = last.max.max(range.max);
                }
                _ => ranges.push(range),
            }
        }
        RangeSet { ranges }
    }

    /// Two-pointer intersection. Fails if the result would be empty.
    pub fn intersection(&self, other: &RangeSet) -> Result<RangeSet, EmptyIntersection> {
        let mut ranges = Vec::new();
        let mut i = 0;
        let mut j = 0;
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];
            let min = a.min.max(b.min);
            let max = a.max.min(b.max);
            if min <= max {
                ranges.push(Range { min, max });
            }
            if a.max <= b.max {
                i += 1;
            } else {
                j += 1;
            }
        }
        if ranges.is_empty() {
            return Err(EmptyIntersection);
        }
        Ok(RangeSet { ranges })
    }

    pub fn contains(&self, pos: u64) -> bool {
        self.ranges.iter().any(|r| r.min <= pos && pos <= r.max)
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ranges: &[(u64, u64)]) -> RangeSet {
        let mut iter = ranges.iter();
        let &(min, max) = iter.next().unwrap();
        let mut set = RangeSet::singleton(min, max);
        for &(min, max) in iter {
            set = set.union(&RangeSet::singleton(min, max));
        }
        set
    }

    #[test]
    fn union_merges_overlapping_and_touching() {
        let merged = set(&[(0, 10), (11, 20), (5, 12), (30, 40)]);
        assert_eq!(
            merged.ranges(),
            &[Range { min: 0, max: 20 }, Range { min: 30, max: 40 }]
        );
    }

    #[test]
    fn union_keeps_separated_intervals_apart() {
        let merged = set(&[(0, 10), (12, 20)]);
        assert_eq!(merged.ranges().len(), 2);
    }

    #[test]
    fn union_is_commutative_and_idempotent() {
        let a = set(&[(0, 5), (100, 200)]);
        let b = set(&[(3, 50), (400, 500)]);
        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.union(&a), a);
    }

    #[test]
    fn union_is_associative() {
        let a = set(&[(0, 5)]);
        let b = set(&[(6, 10), (50, 60)]);
        let c = set(&[(12, 49)]);
        assert_eq!(a.union(&b).union(&c), a.union(&b.union(&c)));
    }

    #[test]
    fn union_output_is_sorted_and_separated() {
        let merged = set(&[(50, 60), (0, 10), (61, 70), (12, 14)]);
        let ranges = merged.ranges();
        for pair in ranges.windows(2) {
            assert!(pair[0].max + 1 < pair[1].min);
        }
    }

    #[test]
    fn contains_checks_closed_bounds() {
        let s = set(&[(10, 20), (30, 40)]);
        assert!(s.contains(10));
        assert!(s.contains(20));
        assert!(s.contains(35));
        assert!(!s.contains(9));
        assert!(!s.contains(21));
        assert!(!s.contains(41));
    }

    #[test]
    fn intersection_with_self_is_identity() {
        let s = set(&[(10, 20), (30, 40)]);
        assert_eq!(s.intersection(&s), Ok(s.clone()));
    }

    #[test]
    fn intersection_splits_and_clips() {
        let a = set(&[(0, 100)]);
        let b = set(&[(10, 20), (30, 40), (200, 300)]);
        let got = a.intersection(&b).unwrap();
        assert_eq!(
            got.ranges(),
            &[Range { min: 10, max: 20 }, Range { min: 30, max: 40 }]
        );
    }

    #[test]
    fn empty_intersection_is_an_error() {
        let a = set(&[(0, 10)]);
        let b = set(&[(20, 30)]);
        assert_eq!(a.intersection(&b), Err(EmptyIntersection));
    }
}
