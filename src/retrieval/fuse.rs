//! Reciprocal rank fusion and greedy diversification.

use std::collections::HashMap;

/// A fused candidate with its per-source ranks (1-based).
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    /// Candidate id.
    pub id: String,
    /// Fused score.
    pub score: f64,
    /// Rank in the full-text list, when present.
    pub ft_rank: Option<usize>,
    /// Rank in the vector list, when present.
    pub vec_rank: Option<usize>,
}

impl FusedCandidate {
    /// The full-text RRF contribution.
    #[must_use]
    pub fn ft_rrf(&self, alpha: f64, k_rrf: f64) -> f64 {
        self.ft_rank
            .map_or(0.0, |rank| alpha / (k_rrf + rank as f64))
    }

    /// The vector RRF contribution.
    #[must_use]
    pub fn vec_rrf(&self, alpha: f64, k_rrf: f64) -> f64 {
        self.vec_rank
            .map_or(0.0, |rank| (1.0 - alpha) / (k_rrf + rank as f64))
    }
}

/// Fuse two ranked id lists.
///
/// `score = alpha / (k_rrf + rank_ft) + (1 - alpha) / (k_rrf + rank_vec)`,
/// an absent rank contributing nothing. Sorted by score descending;
/// ties break on `rank_ft + rank_vec` ascending, then id.
#[must_use]
pub fn rrf_fuse(ft_ranked: &[String], vec_ranked: &[String], alpha: f64, k_rrf: f64) -> Vec<FusedCandidate> {
    let mut by_id: HashMap<&str, FusedCandidate> = HashMap::new();

    for (rank0, id) in ft_ranked.iter().enumerate() {
        by_id
            .entry(id.as_str())
            .or_insert_with(|| FusedCandidate {
                id: id.clone(),
                score: 0.0,
                ft_rank: None,
                vec_rank: None,
            })
            .ft_rank = Some(rank0 + 1);
    }
    for (rank0, id) in vec_ranked.iter().enumerate() {
        by_id
            .entry(id.as_str())
            .or_insert_with(|| FusedCandidate {
                id: id.clone(),
                score: 0.0,
                ft_rank: None,
                vec_rank: None,
            })
            .vec_rank = Some(rank0 + 1);
    }

    let mut fused: Vec<FusedCandidate> = by_id
        .into_values()
        .map(|mut candidate| {
            candidate.score =
                candidate.ft_rrf(alpha, k_rrf) + candidate.vec_rrf(alpha, k_rrf);
            candidate
        })
        .collect();

    // Missing ranks sort last within a score tie.
    const ABSENT: usize = 1 << 20;
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_sum = a.ft_rank.unwrap_or(ABSENT) + a.vec_rank.unwrap_or(ABSENT);
                let b_sum = b.ft_rank.unwrap_or(ABSENT) + b.vec_rank.unwrap_or(ABSENT);
                a_sum.cmp(&b_sum)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

/// An item eligible for diversification.
#[derive(Debug, Clone, PartialEq)]
pub struct DiversifyItem {
    /// Candidate id.
    pub id: String,
    /// Fused score.
    pub score: f64,
    /// Owning document.
    pub doc_id: String,
    /// Origin source.
    pub source: String,
}

/// Greedy diversification with a multiplicative penalty.
///
/// At each pick the adjusted score is
/// `fused / (1 + lambda_doc * n_doc + lambda_src * n_src)` where `n_doc` and
/// `n_src` count already-selected items sharing the document or source.
#[must_use]
pub fn diversify(
    items: &[DiversifyItem],
    lambda_doc: f64,
    lambda_src: f64,
    k: usize,
) -> Vec<DiversifyItem> {
    let mut remaining: Vec<&DiversifyItem> = items.iter().collect();
    let mut selected: Vec<DiversifyItem> = Vec::with_capacity(k.min(items.len()));
    let mut doc_counts: HashMap<&str, usize> = HashMap::new();
    let mut src_counts: HashMap<&str, usize> = HashMap::new();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_adj = f64::NEG_INFINITY;
        for (idx, item) in remaining.iter().enumerate() {
            let n_doc = *doc_counts.get(item.doc_id.as_str()).unwrap_or(&0) as f64;
            let n_src = *src_counts.get(item.source.as_str()).unwrap_or(&0) as f64;
            let adj = item.score / (1.0 + lambda_doc * n_doc + lambda_src * n_src);
            if adj > best_adj {
                best_adj = adj;
                best_idx = idx;
            }
        }
        let picked = remaining.remove(best_idx);
        *doc_counts.entry(picked.doc_id.as_str()).or_default() += 1;
        *src_counts.entry(picked.source.as_str()).or_default() += 1;
        selected.push(picked.clone());
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn overlapping_candidates_accumulate_both_contributions() {
        let fused = rrf_fuse(&ids(&["a", "b"]), &ids(&["b", "c"]), 0.5, 60.0);
        let b = fused.iter().find(|f| f.id == "b").unwrap();
        assert_eq!(b.ft_rank, Some(2));
        assert_eq!(b.vec_rank, Some(1));
        // b appears in both lists, so it outranks a and c.
        assert_eq!(fused[0].id, "b");
    }

    #[test]
    fn absent_rank_contributes_nothing() {
        let fused = rrf_fuse(&ids(&["a"]), &[], 0.5, 60.0);
        assert_eq!(fused.len(), 1);
        let a = &fused[0];
        assert!(a.vec_rank.is_none());
        assert!((a.score - 0.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn reversed_rankings_put_first_positions_on_top() {
        // With alpha 0.5 and rankings that are reverses of each other, the
        // first-position candidates of the two inputs tie for the top (by
        // convexity of 1/(k+r)) and ids break the tie.
        let forward = ids(&["a", "b", "c"]);
        let reverse = ids(&["c", "b", "a"]);
        let fused = rrf_fuse(&forward, &reverse, 0.5, 60.0);

        let order: Vec<&str> = fused.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
        assert!((fused[0].score - fused[1].score).abs() < 1e-12);
        assert!(fused[1].score > fused[2].score);
    }

    #[test]
    fn alpha_one_is_pure_lexical() {
        let fused = rrf_fuse(&ids(&["ft"]), &ids(&["vec"]), 1.0, 60.0);
        assert_eq!(fused[0].id, "ft");
        assert_eq!(fused[1].score, 0.0);
    }

    #[test]
    fn diversify_penalizes_repeated_docs() {
        let items = vec![
            DiversifyItem {
                id: "a1".into(),
                score: 1.0,
                doc_id: "A".into(),
                source: "s".into(),
            },
            DiversifyItem {
                id: "a2".into(),
                score: 0.95,
                doc_id: "A".into(),
                source: "s".into(),
            },
            DiversifyItem {
                id: "b1".into(),
                score: 0.6,
                doc_id: "B".into(),
                source: "s".into(),
            },
        ];

        let picked = diversify(&items, 0.75, 0.25, 2);
        let order: Vec<&str> = picked.iter().map(|i| i.id.as_str()).collect();
        // After a1, a2's adjusted score is 0.95 / 2.0 < b1's 0.6 / 1.25.
        assert_eq!(order, vec!["a1", "b1"]);
    }

    #[test]
    fn diversify_respects_k_and_empty_input() {
        assert!(diversify(&[], 0.75, 0.25, 4).is_empty());
        let items = vec![DiversifyItem {
            id: "x".into(),
            score: 1.0,
            doc_id: "D".into(),
            source: "s".into(),
        }];
        assert_eq!(diversify(&items, 0.75, 0.25, 10).len(), 1);
    }
}
