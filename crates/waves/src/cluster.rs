//! Wave clustering: group pending demand documents by product-set
//! similarity so a released wave shares as much pick-work as possible.
//!
//! Advisory only. The output proposes clusters; creating and releasing a
//! wave from a proposal is a separate, explicit step.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use packwave_demand::DocumentId;
use packwave_products::ProductId;

/// One eligible document: approved, pending, not assigned to a wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCandidate {
    pub document_id: DocumentId,
    pub products: BTreeSet<ProductId>,
    pub line_count: u32,
}

/// Clustering knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    /// Minimum Jaccard similarity for a document to join a cluster.
    pub min_similarity: f64,
    /// Hard cap on documents per cluster.
    pub max_documents: usize,
}

/// Operational size bucket, by total line count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterSize {
    Xs,
    S,
    M,
    L,
}

impl ClusterSize {
    fn for_lines(total_lines: u32) -> Self {
        match total_lines {
            0..=4 => ClusterSize::Xs,
            5..=10 => ClusterSize::S,
            11..=25 => ClusterSize::M,
            _ => ClusterSize::L,
        }
    }
}

/// A proposed wave: two or more documents with overlapping product sets.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub document_ids: Vec<DocumentId>,
    pub products: BTreeSet<ProductId>,
    pub total_lines: u32,
    /// Similarity of the seed pair this cluster grew from.
    pub seed_similarity: f64,
    pub size: ClusterSize,
}

/// Jaccard similarity `|A∩B| / |A∪B|`; 0 for two empty sets.
pub fn jaccard(a: &BTreeSet<ProductId>, b: &BTreeSet<ProductId>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Greedy similarity clustering.
///
/// Seeds a cluster from the highest-similarity unassigned pair, then grows
/// it with the best remaining document whose similarity to the cluster's
/// combined product set stays at or above `min_similarity`, stopping at
/// `max_documents`. Repeats until no eligible pair remains. Documents that
/// join nothing are simply not in the output.
///
/// Ties break on document id, so the proposal is deterministic for a given
/// candidate set.
pub fn suggest_clusters(candidates: &[ClusterCandidate], params: &ClusterParams) -> Vec<Cluster> {
    if params.max_documents < 2 || candidates.len() < 2 {
        return Vec::new();
    }

    // All eligible pairs, best first.
    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            let sim = jaccard(&candidates[i].products, &candidates[j].products);
            if sim >= params.min_similarity && sim > 0.0 {
                pairs.push((sim, i, j));
            }
        }
    }
    pairs.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(core::cmp::Ordering::Equal)
            .then_with(|| {
                (candidates[a.1].document_id, candidates[a.2].document_id)
                    .cmp(&(candidates[b.1].document_id, candidates[b.2].document_id))
            })
    });

    let mut assigned = vec![false; candidates.len()];
    let mut clusters = Vec::new();

    for &(seed_similarity, i, j) in &pairs {
        if assigned[i] || assigned[j] {
            continue;
        }

        let mut member_idx = vec![i, j];
        let mut combined: BTreeSet<ProductId> = candidates[i]
            .products
            .union(&candidates[j].products)
            .copied()
            .collect();
        assigned[i] = true;
        assigned[j] = true;

        // Grow: best-matching unassigned document against the combined set.
        while member_idx.len() < params.max_documents {
            let mut best: Option<(f64, usize)> = None;
            for (k, candidate) in candidates.iter().enumerate() {
                if assigned[k] {
                    continue;
                }
                let sim = jaccard(&candidate.products, &combined);
                if sim < params.min_similarity || sim == 0.0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((best_sim, best_k)) => {
                        sim > best_sim
                            || (sim == best_sim
                                && candidate.document_id < candidates[best_k].document_id)
                    }
                };
                if better {
                    best = Some((sim, k));
                }
            }

            match best {
                Some((_, k)) => {
                    combined.extend(candidates[k].products.iter().copied());
                    assigned[k] = true;
                    member_idx.push(k);
                }
                None => break,
            }
        }

        let total_lines: u32 = member_idx.iter().map(|&k| candidates[k].line_count).sum();
        clusters.push(Cluster {
            document_ids: member_idx
                .iter()
                .map(|&k| candidates[k].document_id)
                .collect(),
            products: combined,
            total_lines,
            seed_similarity,
            size: ClusterSize::for_lines(total_lines),
        });
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use packwave_core::AggregateId;

    fn doc() -> DocumentId {
        DocumentId::new(AggregateId::new())
    }

    fn products(ids: &[ProductId]) -> BTreeSet<ProductId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn jaccard_of_overlapping_sets() {
        let a = ProductId::new(AggregateId::new());
        let b = ProductId::new(AggregateId::new());
        let c = ProductId::new(AggregateId::new());

        let set_ab = products(&[a, b]);
        let set_abc = products(&[a, b, c]);
        let sim = jaccard(&set_ab, &set_abc);
        assert!((sim - 2.0 / 3.0).abs() < 1e-9);

        assert_eq!(jaccard(&set_ab, &products(&[])), 0.0);
        assert_eq!(jaccard(&products(&[]), &products(&[])), 0.0);
    }

    #[test]
    fn similar_orders_cluster_and_outlier_stays_out() {
        // {A,B}, {A,B,C} pair at 0.67; {D,E} shares nothing.
        let a = ProductId::new(AggregateId::new());
        let b = ProductId::new(AggregateId::new());
        let c = ProductId::new(AggregateId::new());
        let d = ProductId::new(AggregateId::new());
        let e = ProductId::new(AggregateId::new());

        let doc1 = doc();
        let doc2 = doc();
        let doc3 = doc();
        let candidates = vec![
            ClusterCandidate {
                document_id: doc1,
                products: products(&[a, b]),
                line_count: 2,
            },
            ClusterCandidate {
                document_id: doc2,
                products: products(&[a, b, c]),
                line_count: 3,
            },
            ClusterCandidate {
                document_id: doc3,
                products: products(&[d, e]),
                line_count: 2,
            },
        ];

        let clusters = suggest_clusters(
            &candidates,
            &ClusterParams {
                min_similarity: 0.3,
                max_documents: 10,
            },
        );

        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.document_ids.len(), 2);
        assert!(cluster.document_ids.contains(&doc1));
        assert!(cluster.document_ids.contains(&doc2));
        assert!(!cluster.document_ids.contains(&doc3));
        assert!((cluster.seed_similarity - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(cluster.total_lines, 5);
        assert_eq!(cluster.size, ClusterSize::S);
    }

    #[test]
    fn cluster_growth_respects_max_documents() {
        // Four identical product sets; cap at 3.
        let a = ProductId::new(AggregateId::new());
        let b = ProductId::new(AggregateId::new());
        let candidates: Vec<ClusterCandidate> = (0..4)
            .map(|_| ClusterCandidate {
                document_id: doc(),
                products: products(&[a, b]),
                line_count: 2,
            })
            .collect();

        let clusters = suggest_clusters(
            &candidates,
            &ClusterParams {
                min_similarity: 0.5,
                max_documents: 3,
            },
        );

        assert_eq!(clusters[0].document_ids.len(), 3);
        // The fourth document has no partner left, so it stays unclustered.
        let clustered: usize = clusters.iter().map(|c| c.document_ids.len()).sum();
        assert_eq!(clustered, 3);
    }

    #[test]
    fn below_threshold_pairs_do_not_cluster() {
        let a = ProductId::new(AggregateId::new());
        let b = ProductId::new(AggregateId::new());
        let c = ProductId::new(AggregateId::new());
        let d = ProductId::new(AggregateId::new());

        // Jaccard({a,b},{a,c,d}) = 1/4 < 0.3.
        let candidates = vec![
            ClusterCandidate {
                document_id: doc(),
                products: products(&[a, b]),
                line_count: 2,
            },
            ClusterCandidate {
                document_id: doc(),
                products: products(&[a, c, d]),
                line_count: 3,
            },
        ];

        let clusters = suggest_clusters(
            &candidates,
            &ClusterParams {
                min_similarity: 0.3,
                max_documents: 10,
            },
        );
        assert!(clusters.is_empty());
    }

    #[test]
    fn size_buckets() {
        assert_eq!(ClusterSize::for_lines(3), ClusterSize::Xs);
        assert_eq!(ClusterSize::for_lines(5), ClusterSize::S);
        assert_eq!(ClusterSize::for_lines(20), ClusterSize::M);
        assert_eq!(ClusterSize::for_lines(60), ClusterSize::L);
    }
}
