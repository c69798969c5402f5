use serde::{Deserialize, Serialize};

/// Classification of a grievance relative to the batch and the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrievanceStatus {
    Unique,
    NearDuplicate,
    Duplicate,
}

impl GrievanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unique => "UNIQUE",
            Self::NearDuplicate => "NEAR_DUPLICATE",
            Self::Duplicate => "DUPLICATE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNIQUE" => Some(Self::Unique),
            "NEAR_DUPLICATE" => Some(Self::NearDuplicate),
            "DUPLICATE" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

/// Intra-PDF classification from the local dedup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    LocalUnique,
    LocalNearDuplicate,
    LocalDuplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionType {
    // direct text submissions arrive outside the batch pipeline
    #[allow(dead_code)]
    Text,
    Pdf,
}

impl SubmissionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// CONTEXTUAL is accepted by the schema but not produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterType {
    Duplicate,
    NearDuplicate,
    #[allow(dead_code)]
    Contextual,
}

impl ClusterType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "DUPLICATE",
            Self::NearDuplicate => "NEAR_DUPLICATE",
            Self::Contextual => "CONTEXTUAL",
        }
    }

    pub fn for_status(status: GrievanceStatus) -> Option<Self> {
        match status {
            GrievanceStatus::Duplicate => Some(Self::Duplicate),
            GrievanceStatus::NearDuplicate => Some(Self::NearDuplicate),
            GrievanceStatus::Unique => None,
        }
    }
}

/// Match target for a classified grievance. Within-batch matches stay
/// `Pending` until the batch insert resolves them to real row ids; only
/// `Persisted` ids may reach the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTarget {
    Pending(usize),
    Persisted(i64),
}

/// Per-signal score components, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreBreakdown {
    pub cosine: f64,
    pub jaccard: f64,
    pub ngram: f64,
    pub contextual: f64,
}

/// Orchestrator input document.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSubmit {
    pub user_id: i64,
    pub pdfs: Vec<PdfSubmission>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdfSubmission {
    pub pdf_id: i64,
    pub filename: String,
    #[serde(default)]
    pub area: String,
    pub grievances: Vec<PageGrievance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageGrievance {
    pub page_number: i64,
    pub text: String,
}

/// Observable batch state, as stored and as reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub batch_id: i64,
    pub status: String,
    pub total_pdfs: i64,
    pub processed_pdfs: i64,
    pub total_grievances: i64,
    pub unique_count: i64,
    pub duplicate_count: i64,
    pub near_duplicate_count: i64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Reviewer correction applied through the feedback path.
#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    pub grievance_id: i64,
    pub matched_grievance_id: Option<i64>,
    pub original_status: GrievanceStatus,
    pub corrected_status: GrievanceStatus,
    pub original_score: Option<f64>,
    pub notes: Option<String>,
}

/// Manifest written under `<cache-root>/manifests/` after each run.
#[derive(Debug, Serialize)]
pub struct BatchRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub batch_id: i64,
    pub status: String,
    pub started_at: String,
    pub completed_at: String,
    pub embedding_model: String,
    pub duplicate_threshold: f64,
    pub near_duplicate_threshold: f64,
    pub total_pdfs: usize,
    pub processed_pdfs: usize,
    pub total_grievances: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
    pub near_duplicate_count: usize,
    pub clusters_created: usize,
    pub rejected_candidates: usize,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            GrievanceStatus::Unique,
            GrievanceStatus::NearDuplicate,
            GrievanceStatus::Duplicate,
        ] {
            assert_eq!(GrievanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(
            GrievanceStatus::parse("near_duplicate"),
            Some(GrievanceStatus::NearDuplicate)
        );
        assert_eq!(GrievanceStatus::parse("bogus"), None);
    }

    #[test]
    fn cluster_type_tracks_member_status() {
        assert_eq!(
            ClusterType::for_status(GrievanceStatus::Duplicate),
            Some(ClusterType::Duplicate)
        );
        assert_eq!(ClusterType::for_status(GrievanceStatus::Unique), None);
    }
}
