//! Longest-common-subsequence diff over arbitrary token sequences.
//!
//! The matcher strips the common prefix and suffix, then runs the
//! Hunt–Szymanski algorithm on what is left: for every element of the left
//! sequence the candidate positions in the right sequence are visited in
//! descending order and a threshold vector (kept sorted, so that it can be
//! searched with [`slice::partition_point`]) records the smallest right
//! index ending a common subsequence of each length. The subsequence itself
//! is recovered through back links stored in an arena.
//!
//! Lines are interned with [`imara_diff::intern::Interner`] before diffing,
//! so comparing two tokens is a cheap integer comparison.

use std::hash::Hash;
use std::ops::Range;

use imara_diff::intern::{Interner, Token};
use rustc_hash::FxHashMap;

/// A maximal run of either matching or differing elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub left: Range<usize>,
    pub right: Range<usize>,
    pub same: bool,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    left: usize,
    right: usize,
    prev: Option<usize>,
}

/// For every index of `left`, the index of the `right` element it is matched
/// with in a longest common subsequence, if any. Matched right indices are
/// strictly increasing.
pub fn lcs_matches<T: Hash + Eq>(left: &[T], right: &[T]) -> Vec<Option<usize>> {
    let mut matches = vec![None; left.len()];

    let prefix = left
        .iter()
        .zip(right)
        .take_while(|(a, b)| a == b)
        .count();
    for (i, m) in matches.iter_mut().enumerate().take(prefix) {
        *m = Some(i);
    }
    let suffix = left[prefix..]
        .iter()
        .rev()
        .zip(right[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    for k in 0..suffix {
        matches[left.len() - 1 - k] = Some(right.len() - 1 - k);
    }

    let inner_left = &left[prefix..left.len() - suffix];
    let inner_right = &right[prefix..right.len() - suffix];
    if inner_left.is_empty() || inner_right.is_empty() {
        return matches;
    }

    // positions of each right element, descending
    let mut positions: FxHashMap<&T, Vec<usize>> = FxHashMap::default();
    for (j, item) in inner_right.iter().enumerate().rev() {
        positions.entry(item).or_default().push(j);
    }

    let mut thresh: Vec<usize> = Vec::new();
    let mut link_at: Vec<usize> = Vec::new();
    let mut links: Vec<Link> = Vec::new();
    for (i, item) in inner_left.iter().enumerate() {
        let Some(candidates) = positions.get(item) else {
            continue;
        };
        for &j in candidates {
            let k = thresh.partition_point(|&t| t < j);
            if k == thresh.len() {
                thresh.push(j);
            } else if j < thresh[k] {
                thresh[k] = j;
            } else {
                continue;
            }

            let prev = k.checked_sub(1).map(|prev| link_at[prev]);
            links.push(Link {
                left: i,
                right: j,
                prev,
            });
            let id = links.len() - 1;
            if k == link_at.len() {
                link_at.push(id);
            } else {
                link_at[k] = id;
            }
        }
    }

    let mut cursor = link_at.last().copied();
    while let Some(id) = cursor {
        let link = links[id];
        matches[prefix + link.left] = Some(prefix + link.right);
        cursor = link.prev;
    }
    matches
}

/// Turns LCS matches into alternating runs of matching and differing elements.
///
/// Two empty sequences produce no hunks. A differing hunk may be empty on
/// one side (pure insertion or deletion).
pub fn hunks_from_matches(matches: &[Option<usize>], right_len: usize) -> Vec<Hunk> {
    let left_len = matches.len();
    let mut hunks = Vec::new();
    let (mut i, mut j) = (0, 0);
    loop {
        let (same_i, same_j) = (i, j);
        while i < left_len && matches[i] == Some(j) {
            i += 1;
            j += 1;
        }
        if i > same_i {
            hunks.push(Hunk {
                left: same_i..i,
                right: same_j..j,
                same: true,
            });
        }
        if i >= left_len && j >= right_len {
            break;
        }

        let (diff_i, diff_j) = (i, j);
        while i < left_len && matches[i].is_none() {
            i += 1;
        }
        j = matches.get(i).copied().flatten().unwrap_or(right_len);
        hunks.push(Hunk {
            left: diff_i..i,
            right: diff_j..j,
            same: false,
        });
    }
    hunks
}

pub fn diff<T: Hash + Eq>(left: &[T], right: &[T]) -> Vec<Hunk> {
    hunks_from_matches(&lcs_matches(left, right), right.len())
}

/// Splits on `\n`, dropping the `\r` of `\r\n` line endings.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Line-level diff of two texts.
pub fn diff_lines(left: &[&str], right: &[&str]) -> Vec<Hunk> {
    let mut interner: Interner<&str> = Interner::new(left.len() + right.len());
    let left: Vec<Token> = left.iter().map(|line| interner.intern(*line)).collect();
    let right: Vec<Token> = right.iter().map(|line| interner.intern(*line)).collect();
    diff(&left, &right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hunk(left: Range<usize>, right: Range<usize>, same: bool) -> Hunk {
        Hunk { left, right, same }
    }

    /// Textbook O(n·m) LCS length.
    fn lcs_len(left: &[u8], right: &[u8]) -> usize {
        let mut table = vec![vec![0usize; right.len() + 1]; left.len() + 1];
        for i in 0..left.len() {
            for j in 0..right.len() {
                table[i + 1][j + 1] = if left[i] == right[j] {
                    table[i][j] + 1
                } else {
                    table[i][j + 1].max(table[i + 1][j])
                };
            }
        }
        table[left.len()][right.len()]
    }

    #[test]
    fn test_single_change() {
        assert_eq!(
            diff(&["a", "b", "c"], &["a", "x", "c"]),
            vec![
                hunk(0..1, 0..1, true),
                hunk(1..2, 1..2, false),
                hunk(2..3, 2..3, true)
            ]
        );
    }

    #[test]
    fn test_edge_cases() {
        let empty: [&str; 0] = [];
        assert_eq!(diff(&empty, &empty), vec![]);
        assert_eq!(diff(&["a"], &empty), vec![hunk(0..1, 0..0, false)]);
        assert_eq!(diff(&empty, &["a", "b"]), vec![hunk(0..0, 0..2, false)]);
        assert_eq!(diff(&["a", "b"], &["a", "b"]), vec![hunk(0..2, 0..2, true)]);
        assert_eq!(
            diff(&["a", "b"], &["a", "new", "b"]),
            vec![
                hunk(0..1, 0..1, true),
                hunk(1..1, 1..2, false),
                hunk(1..2, 2..3, true)
            ]
        );
    }

    #[test]
    fn test_moved_block() {
        let left = ["x", "a", "b", "c", "y"];
        let right = ["a", "b", "c", "x", "y"];
        let matches = lcs_matches(&left, &right);
        assert_eq!(matches.iter().flatten().count(), 4);
        assert_eq!(matches, vec![None, Some(0), Some(1), Some(2), Some(4)]);
    }

    #[test]
    fn test_diff_lines() {
        let left = split_lines("one\r\ntwo\nthree");
        let right = split_lines("one\ntwo\nfour");
        assert_eq!(left, vec!["one", "two", "three"]);
        assert_eq!(
            diff_lines(&left, &right),
            vec![hunk(0..2, 0..2, true), hunk(2..3, 2..3, false)]
        );
    }

    proptest! {
        #[test]
        fn lcs_is_optimal_and_consistent(
            left in prop::collection::vec(0u8..4, 0..40),
            right in prop::collection::vec(0u8..4, 0..40),
        ) {
            let matches = lcs_matches(&left, &right);
            let pairs: Vec<(usize, usize)> = matches
                .iter()
                .enumerate()
                .filter_map(|(i, j)| j.map(|j| (i, j)))
                .collect();

            for window in pairs.windows(2) {
                prop_assert!(window[0].1 < window[1].1);
            }
            for &(i, j) in &pairs {
                prop_assert_eq!(left[i], right[j]);
            }
            prop_assert_eq!(pairs.len(), lcs_len(&left, &right));
        }

        #[test]
        fn hunks_cover_both_sides(
            left in prop::collection::vec(0u8..4, 0..30),
            right in prop::collection::vec(0u8..4, 0..30),
        ) {
            let hunks = diff(&left, &right);
            let (mut i, mut j) = (0, 0);
            let mut previous_same = None;
            for hunk in &hunks {
                prop_assert_eq!(hunk.left.start, i);
                prop_assert_eq!(hunk.right.start, j);
                prop_assert!(!hunk.left.is_empty() || !hunk.right.is_empty());
                prop_assert_ne!(previous_same, Some(hunk.same));
                if hunk.same {
                    prop_assert_eq!(&left[hunk.left.clone()], &right[hunk.right.clone()]);
                }
                i = hunk.left.end;
                j = hunk.right.end;
                previous_same = Some(hunk.same);
            }
            prop_assert_eq!((i, j), (left.len(), right.len()));
        }
    }
}
