use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::dedup::WorkItem;
use crate::model::{GrievanceStatus, MatchTarget};
use crate::similarity::cosine_similarity;
use crate::thresholds::ThresholdSnapshot;

/// DBSCAN label for points without enough neighbors.
pub const NOISE: i64 = 0;
/// Unvisited sentinel.
const UNVISITED: i64 = -1;

pub const MIN_POINTS: usize = 2;

/// Density-based clustering over cosine distance (1 - cosine). Region
/// queries run against a precomputed full similarity matrix; batch
/// sizes stay small enough for the quadratic scan.
///
/// Labels: -1 is never returned; 0 is noise; clusters number from 1.
/// A point that already carries a label is never relabeled, even when a
/// later expansion reaches it.
pub fn dbscan(embeddings: &[Vec<f32>], eps: f64, min_points: usize) -> Vec<i64> {
    let count = embeddings.len();
    let mut labels = vec![UNVISITED; count];
    if count == 0 {
        return labels;
    }

    let mut distance = vec![vec![0.0_f64; count]; count];
    for row in 0..count {
        for col in (row + 1)..count {
            let value = 1.0 - cosine_similarity(&embeddings[row], &embeddings[col]);
            distance[row][col] = value;
            distance[col][row] = value;
        }
    }

    let region_query = |point: usize| -> Vec<usize> {
        (0..count)
            .filter(|other| distance[point][*other] <= eps)
            .collect()
    };

    let mut cluster_id = 0_i64;
    for point in 0..count {
        if labels[point] != UNVISITED {
            continue;
        }

        let neighbors = region_query(point);
        if neighbors.len() < min_points {
            labels[point] = NOISE;
            continue;
        }

        cluster_id += 1;
        labels[point] = cluster_id;

        let mut queue: VecDeque<usize> = neighbors
            .into_iter()
            .filter(|neighbor| *neighbor != point)
            .collect();

        while let Some(candidate) = queue.pop_front() {
            if labels[candidate] != UNVISITED {
                continue;
            }
            labels[candidate] = cluster_id;

            let candidate_neighbors = region_query(candidate);
            if candidate_neighbors.len() >= min_points {
                for neighbor in candidate_neighbors {
                    if labels[neighbor] == UNVISITED {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
    }

    labels
}

/// Post-pairwise rescue: cluster all batch embeddings and, for each
/// cluster, point the later members at the earliest page. Members still
/// marked UNIQUE upgrade to NEAR_DUPLICATE; DUPLICATE members are left
/// alone.
pub fn rescue_near_duplicates(items: &mut [WorkItem], thresholds: &ThresholdSnapshot) {
    if items.len() < MIN_POINTS {
        return;
    }

    let embeddings: Vec<Vec<f32>> = items.iter().map(|item| item.embedding.clone()).collect();
    let eps = 1.0 - thresholds.near_duplicate;
    let labels = dbscan(&embeddings, eps, MIN_POINTS);

    let mut groups: HashMap<i64, Vec<usize>> = HashMap::new();
    for (index, label) in labels.iter().enumerate() {
        if *label > NOISE {
            groups.entry(*label).or_default().push(index);
        }
    }

    for (label, mut members) in groups {
        if members.len() < 2 {
            continue;
        }

        members.sort_by_key(|index| (items[*index].page_number, *index));
        let primary = members[0];

        for member in members.into_iter().skip(1) {
            if items[member].status != GrievanceStatus::Unique {
                continue;
            }

            let cosine = cosine_similarity(&items[member].embedding, &items[primary].embedding);
            items[member].status = GrievanceStatus::NearDuplicate;
            items[member].matched = Some(MatchTarget::Pending(primary));
            items[member].similarity_score = cosine.clamp(0.0, 1.0);
            items[member].breakdown.cosine = cosine.clamp(0.0, 1.0);

            debug!(
                cluster = label,
                member,
                primary,
                cosine,
                "upgraded unique grievance from density cluster"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::dedup::WorkItem;
    use crate::model::LocalStatus;

    fn unit(values: [f32; 3]) -> Vec<f32> {
        let mut vector = values.to_vec();
        crate::similarity::l2_normalize(&mut vector);
        vector
    }

    fn work_item(index: usize, page_number: i64, embedding: Vec<f32>) -> WorkItem {
        let mut item = WorkItem::new(
            0,
            1,
            "batch.pdf".to_string(),
            page_number,
            format!("complaint {index}"),
            format!("complaint {index}"),
            Category::Other,
            0.0,
            String::new(),
            None,
        );
        item.embedding = embedding;
        item
    }

    #[test]
    fn chained_neighbors_form_one_cluster() {
        // cos(A,B) = cos(B,C) = 0.7, cos(A,C) ~ 0.55: only the chain
        // through B links A and C at eps = 0.40
        let a = unit([1.0, 0.0, 0.0]);
        let b = unit([0.7, 0.714, 0.0]);
        let c = unit([0.55, 0.441, 0.709]);

        let labels = dbscan(&[a, b, c], 0.40, MIN_POINTS);
        assert_eq!(labels, vec![1, 1, 1]);
    }

    #[test]
    fn isolated_points_are_noise() {
        let a = unit([1.0, 0.0, 0.0]);
        let b = unit([0.0, 1.0, 0.0]);
        let labels = dbscan(&[a, b], 0.40, MIN_POINTS);
        assert_eq!(labels, vec![NOISE, NOISE]);
    }

    #[test]
    fn separate_neighborhoods_get_distinct_labels() {
        let a = unit([1.0, 0.0, 0.0]);
        let b = unit([0.95, 0.312, 0.0]);
        let c = unit([0.0, 0.0, 1.0]);
        let d = unit([0.0, 0.312, 0.95]);

        let labels = dbscan(&[a, b, c, d], 0.40, MIN_POINTS);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
        assert!(labels.iter().all(|label| *label > NOISE));
    }

    #[test]
    fn noise_is_never_relabeled() {
        // the border point is visited first and becomes noise at
        // min_points = 3; the later expansion reaches it but must not
        // relabel it
        let border = unit([0.61, 0.0, 0.7924]);
        let a = unit([1.0, 0.0, 0.0]);
        let b = unit([0.95, 0.312, 0.0]);
        let c = unit([0.95, -0.312, 0.0]);

        let labels = dbscan(&[border, a, b, c], 0.40, 3);
        assert_eq!(labels[0], NOISE);
        assert_eq!(labels[1], 1);
        assert_eq!(labels[2], 1);
        assert_eq!(labels[3], 1);
    }

    #[test]
    fn rescue_upgrades_unique_members_toward_earliest_page() {
        let a = unit([1.0, 0.0, 0.0]);
        let b = unit([0.7, 0.714, 0.0]);
        let c = unit([0.55, 0.441, 0.709]);

        let mut items = vec![
            work_item(0, 1, a),
            work_item(1, 2, b),
            work_item(2, 3, c),
        ];

        let thresholds = ThresholdSnapshot::default();
        rescue_near_duplicates(&mut items, &thresholds);

        assert_eq!(items[0].status, GrievanceStatus::Unique);
        assert_eq!(items[1].status, GrievanceStatus::NearDuplicate);
        assert_eq!(items[1].matched, Some(MatchTarget::Pending(0)));
        assert_eq!(items[2].status, GrievanceStatus::NearDuplicate);
        assert_eq!(items[2].matched, Some(MatchTarget::Pending(0)));
    }

    #[test]
    fn rescue_never_downgrades_duplicates() {
        let a = unit([1.0, 0.0, 0.0]);
        let b = unit([0.95, 0.312, 0.0]);

        let mut items = vec![work_item(0, 1, a), work_item(1, 2, b)];
        items[1].status = GrievanceStatus::Duplicate;
        items[1].local_status = LocalStatus::LocalDuplicate;
        items[1].matched = Some(MatchTarget::Pending(0));
        items[1].similarity_score = 0.97;

        rescue_near_duplicates(&mut items, &ThresholdSnapshot::default());

        assert_eq!(items[1].status, GrievanceStatus::Duplicate);
        assert_eq!(items[1].similarity_score, 0.97);
    }
}
