use tracing::debug;

use crate::category::Category;
use crate::model::{GrievanceStatus, LocalStatus, MatchTarget, ScoreBreakdown};
use crate::similarity::{composite_score, SimilaritySubject};
use crate::thresholds::ThresholdSnapshot;

/// Candidates ranked per grievance in the global pass.
pub const TOP_K: usize = 10;
/// How many of the ranked candidates are kept for the audit trail.
pub const TOP_MATCH_AUDIT: usize = 3;

/// One grievance moving through the batch pipeline.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub pdf_index: usize,
    pub pdf_id: i64,
    pub source_filename: String,
    pub page_number: i64,
    pub original_text: String,
    pub processed_text: String,
    pub tokens: Vec<String>,
    pub category: Category,
    pub category_confidence: f64,
    pub area: String,
    pub location_details: Option<String>,
    pub embedding: Vec<f32>,

    pub local_status: LocalStatus,
    pub local_best: Option<LocalMatch>,
    pub status: GrievanceStatus,
    pub similarity_score: f64,
    pub matched: Option<MatchTarget>,
    pub breakdown: ScoreBreakdown,
    pub top_matches: Vec<TopMatch>,
}

impl WorkItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pdf_index: usize,
        pdf_id: i64,
        source_filename: String,
        page_number: i64,
        original_text: String,
        processed_text: String,
        category: Category,
        category_confidence: f64,
        area: String,
        location_details: Option<String>,
    ) -> Self {
        let tokens = processed_text
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
        Self {
            pdf_index,
            pdf_id,
            source_filename,
            page_number,
            original_text,
            processed_text,
            tokens,
            category,
            category_confidence,
            area,
            location_details,
            embedding: Vec::new(),
            local_status: LocalStatus::LocalUnique,
            local_best: None,
            status: GrievanceStatus::Unique,
            similarity_score: 0.0,
            matched: None,
            breakdown: ScoreBreakdown::default(),
            top_matches: Vec::new(),
        }
    }

    fn subject(&self) -> SimilaritySubject<'_> {
        SimilaritySubject {
            embedding: &self.embedding,
            tokens: &self.tokens,
            category: self.category,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalMatch {
    pub sibling_index: usize,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy)]
pub struct TopMatch {
    pub target: MatchTarget,
    pub score: f64,
}

/// A previously persisted grievance from the historical pool.
#[derive(Debug, Clone)]
pub struct HistoricalCandidate {
    pub grievance_id: i64,
    pub tokens: Vec<String>,
    pub category: Option<Category>,
    pub area: String,
    pub embedding: Vec<f32>,
}

impl HistoricalCandidate {
    fn subject(&self) -> SimilaritySubject<'_> {
        SimilaritySubject {
            embedding: &self.embedding,
            tokens: &self.tokens,
            category: self.category.unwrap_or(Category::Other),
        }
    }
}

#[derive(Clone, Copy)]
enum CandidateRef {
    Historical(usize),
    Batch(usize),
}

/// Pass A: within each PDF, walk grievances in page order and compare
/// each against its earlier siblings only.
pub fn run_local_pass(items: &mut [WorkItem], thresholds: &ThresholdSnapshot) {
    let mut start = 0;
    while start < items.len() {
        let mut end = start + 1;
        while end < items.len() && items[end].pdf_index == items[start].pdf_index {
            end += 1;
        }

        for current in start..end {
            let mut best: Option<LocalMatch> = None;
            for sibling in start..current {
                let (score, breakdown) = composite_score(
                    &items[current].subject(),
                    &items[sibling].subject(),
                    &thresholds.weights,
                );
                if best.map_or(true, |found| score > found.score) {
                    best = Some(LocalMatch {
                        sibling_index: sibling,
                        score,
                        breakdown,
                    });
                }
            }

            if let Some(found) = best {
                items[current].local_status = if found.score >= thresholds.duplicate {
                    LocalStatus::LocalDuplicate
                } else if found.score >= thresholds.near_duplicate {
                    LocalStatus::LocalNearDuplicate
                } else {
                    LocalStatus::LocalUnique
                };
                items[current].local_best = Some(found);
            }
        }

        start = end;
    }
}

/// Pass B: walk the batch in input order against the historical pool
/// plus every earlier batch grievance, with hierarchical category and
/// area filters and a top-K ranking.
pub fn run_global_pass(
    items: &mut [WorkItem],
    historical: &[HistoricalCandidate],
    thresholds: &ThresholdSnapshot,
) {
    for current in 0..items.len() {
        if items[current].local_status == LocalStatus::LocalDuplicate {
            if let Some(found) = items[current].local_best {
                items[current].status = GrievanceStatus::Duplicate;
                items[current].similarity_score = found.score;
                items[current].matched = Some(MatchTarget::Pending(found.sibling_index));
                items[current].breakdown = found.breakdown;
                continue;
            }
        }

        let mut pool: Vec<CandidateRef> = (0..historical.len())
            .map(CandidateRef::Historical)
            .chain((0..current).map(CandidateRef::Batch))
            .collect();

        if items[current].category != Category::Other {
            let filtered: Vec<CandidateRef> = pool
                .iter()
                .copied()
                .filter(|candidate| {
                    candidate_category(candidate, items, historical).map_or(true, |category| {
                        category == Category::Other || category == items[current].category
                    })
                })
                .collect();
            if !filtered.is_empty() {
                pool = filtered;
            }
        }

        if !items[current].area.is_empty() {
            let filtered: Vec<CandidateRef> = pool
                .iter()
                .copied()
                .filter(|candidate| {
                    let area = candidate_area(candidate, items, historical);
                    area.is_empty() || area.eq_ignore_ascii_case(&items[current].area)
                })
                .collect();
            if !filtered.is_empty() {
                pool = filtered;
            }
        }

        let mut ranked: Vec<(MatchTarget, f64, ScoreBreakdown)> = pool
            .iter()
            .map(|candidate| {
                let (target, subject) = match candidate {
                    CandidateRef::Historical(index) => (
                        MatchTarget::Persisted(historical[*index].grievance_id),
                        historical[*index].subject(),
                    ),
                    CandidateRef::Batch(index) => {
                        (MatchTarget::Pending(*index), items[*index].subject())
                    }
                };
                let (score, breakdown) =
                    composite_score(&items[current].subject(), &subject, &thresholds.weights);
                (target, score, breakdown)
            })
            .collect();

        ranked.sort_by(|left, right| right.1.total_cmp(&left.1));
        ranked.truncate(TOP_K);

        items[current].top_matches = ranked
            .iter()
            .take(TOP_MATCH_AUDIT)
            .map(|(target, score, _)| TopMatch {
                target: *target,
                score: *score,
            })
            .collect();

        for (rank, top) in items[current].top_matches.iter().enumerate() {
            debug!(
                index = current,
                rank = rank + 1,
                target = ?top.target,
                score = top.score,
                "candidate for audit trail"
            );
        }

        if let Some((target, score, breakdown)) = ranked.first().copied() {
            items[current].similarity_score = score;
            items[current].breakdown = breakdown;
            items[current].status = if score >= thresholds.duplicate {
                GrievanceStatus::Duplicate
            } else if score >= thresholds.near_duplicate {
                GrievanceStatus::NearDuplicate
            } else {
                GrievanceStatus::Unique
            };
            if items[current].status != GrievanceStatus::Unique {
                items[current].matched = Some(target);
            }
            debug!(
                index = current,
                score,
                status = items[current].status.as_str(),
                "global pass classified grievance"
            );
        }
    }
}

fn candidate_category(
    candidate: &CandidateRef,
    items: &[WorkItem],
    historical: &[HistoricalCandidate],
) -> Option<Category> {
    match candidate {
        CandidateRef::Historical(index) => historical[*index].category,
        CandidateRef::Batch(index) => Some(items[*index].category),
    }
}

fn candidate_area<'a>(
    candidate: &CandidateRef,
    items: &'a [WorkItem],
    historical: &'a [HistoricalCandidate],
) -> &'a str {
    match candidate {
        CandidateRef::Historical(index) => &historical[*index].area,
        CandidateRef::Batch(index) => &items[*index].area,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::TextNormalizer;
    use crate::thresholds::ThresholdSnapshot;

    /// Deterministic unit vector for tests; real vectors only ever come
    /// from the embedding client.
    fn test_vector(cosine_with_base: f32) -> Vec<f32> {
        let mut vector = vec![0.0_f32; 8];
        vector[0] = cosine_with_base;
        vector[1] = (1.0 - cosine_with_base * cosine_with_base).sqrt();
        vector
    }

    fn item(pdf_index: usize, page_number: i64, text: &str, area: &str) -> WorkItem {
        let normalizer = TextNormalizer::new().expect("normalizer compiles");
        let processed = normalizer.normalize(text);
        let (category, confidence) = crate::category::detect_category(text);
        WorkItem::new(
            pdf_index,
            pdf_index as i64 + 1,
            format!("pdf-{pdf_index}.pdf"),
            page_number,
            text.to_string(),
            processed,
            category,
            confidence,
            area.to_string(),
            None,
        )
    }

    #[test]
    fn intra_pdf_duplicate_is_detected_in_page_order() {
        let text = "The water supply in Sector 15 has been irregular for two weeks and \
                    the overhead tank is leaking badly near the park.";
        let mut items = vec![item(0, 1, text, "sector 15"), item(0, 2, text, "sector 15")];
        items[0].embedding = test_vector(1.0);
        items[1].embedding = test_vector(1.0);

        let thresholds = ThresholdSnapshot::default();
        run_local_pass(&mut items, &thresholds);

        assert_eq!(items[0].local_status, LocalStatus::LocalUnique);
        assert_eq!(items[1].local_status, LocalStatus::LocalDuplicate);
        let found = items[1].local_best.expect("second item has a local match");
        assert_eq!(found.sibling_index, 0);
        assert!(found.score >= thresholds.duplicate);

        run_global_pass(&mut items, &[], &thresholds);
        assert_eq!(items[0].status, GrievanceStatus::Unique);
        assert_eq!(items[1].status, GrievanceStatus::Duplicate);
        assert_eq!(items[1].matched, Some(MatchTarget::Pending(0)));
    }

    #[test]
    fn local_pass_does_not_cross_pdf_boundaries() {
        let text = "Garbage is piling up near the vegetable market and the dustbin has \
                    not been emptied for a week, foul smell everywhere.";
        let mut items = vec![item(0, 1, text, ""), item(1, 1, text, "")];
        items[0].embedding = test_vector(1.0);
        items[1].embedding = test_vector(1.0);

        run_local_pass(&mut items, &ThresholdSnapshot::default());
        assert_eq!(items[1].local_status, LocalStatus::LocalUnique);
        assert!(items[1].local_best.is_none());
    }

    #[test]
    fn cross_pdf_overlap_becomes_near_duplicate() {
        let mut items = vec![
            item(
                0,
                1,
                "There is a large pothole near the school gate on the main approach \
                 and vehicles are getting damaged every day.",
                "sector 9",
            ),
            item(
                1,
                1,
                "A deep pothole near the school entrance is damaging vehicles and \
                 causing traffic problems on the approach.",
                "sector 9",
            ),
        ];
        items[0].embedding = test_vector(1.0);
        items[1].embedding = test_vector(0.82);

        let thresholds = ThresholdSnapshot::default();
        run_local_pass(&mut items, &thresholds);
        run_global_pass(&mut items, &[], &thresholds);

        assert_eq!(items[0].status, GrievanceStatus::Unique);
        assert_eq!(items[1].status, GrievanceStatus::NearDuplicate);
        assert_eq!(items[1].matched, Some(MatchTarget::Pending(0)));
        assert!(items[1].similarity_score >= thresholds.near_duplicate);
        assert!(items[1].similarity_score < thresholds.duplicate);
        assert!(!items[1].top_matches.is_empty());
    }

    #[test]
    fn category_mismatch_suppresses_a_would_be_match() {
        let mut items = vec![
            item(
                0,
                1,
                "The water supply line near the community hall has burst and the lane \
                 is flooded since yesterday evening.",
                "",
            ),
            item(
                1,
                1,
                "The power supply line near the community hall has snapped and the \
                 lane is dark since yesterday evening, streetlight dead.",
                "",
            ),
        ];
        assert_eq!(items[0].category, Category::Water);
        assert_eq!(items[1].category, Category::Electricity);
        items[0].embedding = test_vector(1.0);
        items[1].embedding = test_vector(0.8);

        let thresholds = ThresholdSnapshot::default();
        run_local_pass(&mut items, &thresholds);
        run_global_pass(&mut items, &[], &thresholds);

        // the category filter empties the pool for item 1, so the filter
        // is skipped and the -0.25 penalty keeps the pair UNIQUE
        assert_eq!(items[1].status, GrievanceStatus::Unique);
        assert_eq!(items[1].matched, None);
    }

    #[test]
    fn historical_match_uses_persisted_target() {
        let text = "The streetlight at sector 15 block C has been off for 10 days; \
                    please repair urgently before someone is hurt.";
        let normalizer = TextNormalizer::new().expect("normalizer compiles");
        let processed = normalizer.normalize(text);

        let mut items = vec![item(0, 1, text, "sector 15")];
        items[0].embedding = test_vector(1.0);

        let historical = vec![HistoricalCandidate {
            grievance_id: 77,
            tokens: processed.split_whitespace().map(ToOwned::to_owned).collect(),
            category: Some(Category::Electricity),
            area: "sector 15".to_string(),
            embedding: test_vector(1.0),
        }];

        let thresholds = ThresholdSnapshot::default();
        run_local_pass(&mut items, &thresholds);
        run_global_pass(&mut items, &historical, &thresholds);

        assert_eq!(items[0].status, GrievanceStatus::Duplicate);
        assert_eq!(items[0].matched, Some(MatchTarget::Persisted(77)));
    }

    #[test]
    fn area_filter_keeps_unknown_area_candidates() {
        let text = "Stray dogs are roaming near the primary school playground and \
                    children are afraid to walk to class in the morning.";
        let mut items = vec![item(0, 1, text, ""), item(1, 1, text, "ward 4")];
        items[0].embedding = test_vector(1.0);
        items[1].embedding = test_vector(1.0);
        // the ward 4 grievance must still see the candidate whose area
        // is unknown
        let thresholds = ThresholdSnapshot::default();
        run_local_pass(&mut items, &thresholds);
        run_global_pass(&mut items, &[], &thresholds);

        assert_eq!(items[1].status, GrievanceStatus::Duplicate);
        assert_eq!(items[1].matched, Some(MatchTarget::Pending(0)));
    }

    #[test]
    fn single_unique_grievance_scores_zero() {
        let mut items = vec![item(
            0,
            1,
            "The streetlight at sector 15 block C has been off for 10 days; please \
             repair urgently.",
            "sector 15",
        )];
        items[0].embedding = test_vector(1.0);

        let thresholds = ThresholdSnapshot::default();
        run_local_pass(&mut items, &thresholds);
        run_global_pass(&mut items, &[], &thresholds);

        assert_eq!(items[0].status, GrievanceStatus::Unique);
        assert_eq!(items[0].similarity_score, 0.0);
        assert_eq!(items[0].matched, None);
        assert!(items[0].top_matches.is_empty());
    }
}
