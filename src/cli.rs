use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::GrievanceStatus;
use crate::thresholds::ThresholdKind;

#[derive(Parser, Debug)]
#[command(
    name = "grievance-dedup",
    version,
    about = "Batch deduplication pipeline for citizen grievance documents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a submitted batch of PDF-extracted grievances
    Process(ProcessArgs),
    /// Show the observable state of a processing batch
    Status(StatusArgs),
    /// Record a reviewer correction and adjust thresholds
    Feedback(FeedbackArgs),
    /// Inspect or override the adaptive thresholds
    Thresholds(ThresholdsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    #[arg(long, default_value = ".cache/grievance-dedup")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// BatchSubmit JSON document
    #[arg(long)]
    pub input: PathBuf,

    /// Custom embedding endpoint tried before the hosted fallback
    #[arg(long)]
    pub embedding_endpoint: Option<String>,

    /// Texts per embedding request
    #[arg(long, default_value_t = 32)]
    pub embed_batch_size: usize,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/grievance-dedup")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Batch to report; the most recent batch when omitted
    #[arg(long)]
    pub batch_id: Option<i64>,

    /// Print the status document as JSON on stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusValue {
    Unique,
    NearDuplicate,
    Duplicate,
}

impl From<StatusValue> for GrievanceStatus {
    fn from(value: StatusValue) -> Self {
        match value {
            StatusValue::Unique => Self::Unique,
            StatusValue::NearDuplicate => Self::NearDuplicate,
            StatusValue::Duplicate => Self::Duplicate,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FeedbackArgs {
    #[arg(long, default_value = ".cache/grievance-dedup")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub grievance_id: i64,

    #[arg(long, value_enum)]
    pub corrected_status: StatusValue,

    #[arg(long)]
    pub notes: Option<String>,
}

/// Only the signal weights are operator-settable; the classification
/// thresholds move through the feedback path.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum WeightKindValue {
    CosineWeight,
    JaccardWeight,
    NgramWeight,
    MetadataWeight,
}

impl From<WeightKindValue> for ThresholdKind {
    fn from(value: WeightKindValue) -> Self {
        match value {
            WeightKindValue::CosineWeight => Self::CosineWeight,
            WeightKindValue::JaccardWeight => Self::JaccardWeight,
            WeightKindValue::NgramWeight => Self::NgramWeight,
            WeightKindValue::MetadataWeight => Self::MetadataWeight,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ThresholdsArgs {
    #[arg(long, default_value = ".cache/grievance-dedup")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Weight kind to overwrite; requires --value
    #[arg(long, value_enum)]
    pub set: Option<WeightKindValue>,

    #[arg(long)]
    pub value: Option<f64>,
}
