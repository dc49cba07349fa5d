use std::cmp::Ordering;
use crate::PeerId;

mod preferred;
mod optimistic;

pub use preferred::ChokeScheduler;
pub use optimistic::OptimisticUnchokeScheduler;

/// Splits neighbors into the `k` fastest and the rest. Faster download
/// rate first, ties broken by lower peer id.
pub fn rank(mut rates: Vec<(PeerId, f64)>, k: usize) -> (Vec<PeerId>, Vec<PeerId>) {
    rates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    let ids: Vec<PeerId> = rates.into_iter().map(|(id, _)| id).collect();
    let k = k.min(ids.len());
    let (preferred, choked) = ids.split_at(k);
    (preferred.to_vec(), choked.to_vec())
}

// Comma separated ids for log lines.
fn format_ids(ids: &[PeerId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_by_rate() {
        let (preferred, choked) = rank(vec![(2, 1.0), (3, 5.0), (4, 3.0)], 2);
        assert_eq!(preferred, vec![3, 4]);
        assert_eq!(choked, vec![2]);
    }

    #[test]
    fn test_rank_ties_by_id() {
        let (preferred, choked) = rank(vec![(9, 0.0), (4, 0.0), (6, 0.0)], 1);
        assert_eq!(preferred, vec![4]);
        assert_eq!(choked, vec![6, 9]);
    }

    #[test]
    fn test_rank_fewer_than_k() {
        let (preferred, choked) = rank(vec![(2, 1.0)], 3);
        assert_eq!(preferred, vec![2]);
        assert!(choked.is_empty());
        let (preferred, choked) = rank(vec![], 3);
        assert!(preferred.is_empty() && choked.is_empty());
    }

    #[test]
    fn test_format_ids() {
        assert_eq!(format_ids(&[1002, 1003]), "1002,1003");
        assert_eq!(format_ids(&[]), "");
    }
}
