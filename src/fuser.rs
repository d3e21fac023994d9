//! Rank fuser: reciprocal rank fusion (spec section 4.13).
//!
//! `Σ 1/(k + rank_i)` with k=60, summed over every input ranking a chunk
//! key appears in. Chunks appearing in neither list receive no score and
//! are omitted. Generalized to accept any number of lists (today exactly
//! two — keyword, vector — per the resolved ambiguity in section 9(c)) so
//! a third list can be added later without changing the formula.

use std::collections::HashMap;

use uuid::Uuid;

pub type ChunkKey = (Uuid, i64);

/// Fuse any number of rank-ordered lists (best first) into a single score
/// per chunk key, sorted descending.
pub fn fuse_rrf(lists: &[Vec<ChunkKey>], k: f64) -> Vec<(ChunkKey, f64)> {
    let mut scores: HashMap<ChunkKey, f64> = HashMap::new();

    for list in lists {
        for (rank, key) in list.iter().enumerate() {
            // rank is 0-based here; the formula's rank_i is 1-based.
            let contribution = 1.0 / (k + (rank + 1) as f64);
            *scores.entry(*key).or_insert(0.0) += contribution;
        }
    }

    let mut fused: Vec<(ChunkKey, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> ChunkKey {
        (Uuid::from_u128(n as u128), n as i64)
    }

    #[test]
    fn omits_chunks_in_neither_list() {
        let l1 = vec![key(1), key(2)];
        let l2 = vec![key(1)];
        let fused = fuse_rrf(&[l1, l2], 60.0);
        assert!(fused.iter().any(|(k, _)| *k == key(1)));
        assert!(fused.iter().any(|(k, _)| *k == key(2)));
        assert!(!fused.iter().any(|(k, _)| *k == key(3)));
    }

    #[test]
    fn monotonicity_holds() {
        // key(1) ranks higher than key(2) in both lists -> must not rank
        // lower in the fused output (invariant 7).
        let l1 = vec![key(1), key(2), key(3)];
        let l2 = vec![key(1), key(3), key(2)];
        let fused = fuse_rrf(&[l1, l2], 60.0);
        let pos = |k: ChunkKey| fused.iter().position(|(fk, _)| *fk == k).unwrap();
        assert!(pos(key(1)) <= pos(key(2)));
    }

    #[test]
    fn top_rank_scores_highest_when_present_in_both() {
        let l1 = vec![key(1), key(2)];
        let l2 = vec![key(1), key(2)];
        let fused = fuse_rrf(&[l1, l2], 60.0);
        assert_eq!(fused[0].0, key(1));
        assert!(fused[0].1 > fused[1].1);
    }
}
