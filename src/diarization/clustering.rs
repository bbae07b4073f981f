//! Speaker clustering (spec §4.7, §8): connected components of the
//! cosine-distance graph at a fixed threshold, labelled in first-appearance
//! order.
//!
//! The teacher's original clusterer built clusters by repeatedly merging the
//! most-similar `HashMap` buckets. That approach is sensitive to merge order
//! and the configured speaker-count limits. Spec §8 pins down the exact
//! semantics we need instead: "if the distance graph at threshold τ has
//! connected components C, then `cluster_embeddings(E, τ)` assigns each
//! embedding a label equal to the index of its component in first-appearance
//! order." A union-find over pairwise distances computes exactly that, and
//! is invariant to iteration order.

use petgraph::unionfind::UnionFind;

use super::types::SpeakerEmbedding;

/// Assigns each embedding a dense, zero-based cluster label. Two embeddings
/// end up in the same cluster iff they are connected by a chain of pairs
/// whose cosine distance is `< threshold` (transitive closure, not just
/// direct pairwise similarity).
///
/// Labels are assigned in first-appearance order: the first embedding is
/// always label 0, and each subsequently-seen new component gets the next
/// integer.
pub fn cluster_embeddings(embeddings: &[SpeakerEmbedding], threshold: f32) -> Vec<u32> {
    let n = embeddings.len();
    if n == 0 {
        return Vec::new();
    }

    let mut uf = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if embeddings[i].cosine_distance(&embeddings[j]) < threshold {
                uf.union(i, j);
            }
        }
    }

    let mut next_label: u32 = 0;
    let mut label_of_root: std::collections::HashMap<usize, u32> = std::collections::HashMap::new();
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let root = uf.find(i);
        let label = *label_of_root.entry(root).or_insert_with(|| {
            let label = next_label;
            next_label += 1;
            label
        });
        labels.push(label);
    }
    labels
}

/// Number of distinct clusters produced by [`cluster_embeddings`].
pub fn speaker_count(labels: &[u32]) -> usize {
    labels.iter().collect::<std::collections::HashSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(vector: Vec<f32>) -> SpeakerEmbedding {
        SpeakerEmbedding { vector, start_s: 0.0, end_s: 1.0 }
    }

    #[test]
    fn identical_vectors_cluster_together() {
        let embeddings = vec![embedding(vec![1.0, 0.0]), embedding(vec![1.0, 0.0]), embedding(vec![0.0, 1.0])];
        let labels = cluster_embeddings(&embeddings, 0.1);
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
        assert_eq!(speaker_count(&labels), 2);
    }

    #[test]
    fn labels_assigned_in_first_appearance_order() {
        // second embedding is a new speaker, third matches the first.
        let embeddings = vec![embedding(vec![1.0, 0.0]), embedding(vec![0.0, 1.0]), embedding(vec![1.0, 0.0])];
        let labels = cluster_embeddings(&embeddings, 0.1);
        assert_eq!(labels, vec![0, 1, 0]);
    }

    #[test]
    fn transitive_chain_merges_through_an_intermediate() {
        // a-b close, b-c close, a-c far: still one cluster via transitivity.
        let a = embedding(vec![1.0, 0.0, 0.0]);
        let b = embedding(vec![0.9, 0.436, 0.0]); // ~25 degrees from a
        let c = embedding(vec![0.6, 0.8, 0.0]); // ~25 degrees from b, ~53 from a
        let embeddings = vec![a, b, c];
        let labels = cluster_embeddings(&embeddings, 0.2);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(speaker_count(&labels), 1);
    }

    #[test]
    fn empty_input_produces_empty_output() {
        let labels = cluster_embeddings(&[], 0.5);
        assert!(labels.is_empty());
    }

    #[test]
    fn high_threshold_merges_everything() {
        let embeddings = vec![embedding(vec![1.0, 0.0]), embedding(vec![0.0, 1.0]), embedding(vec![-1.0, 0.0])];
        let labels = cluster_embeddings(&embeddings, 3.0);
        assert_eq!(speaker_count(&labels), 1);
    }

    #[test]
    fn zero_threshold_never_merges_distinct_vectors() {
        let embeddings = vec![embedding(vec![1.0, 0.0]), embedding(vec![0.0, 1.0])];
        let labels = cluster_embeddings(&embeddings, 0.0);
        assert_eq!(speaker_count(&labels), 2);
    }
}
