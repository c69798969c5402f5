use anyhow::{bail, Result};
use tracing::info;

use crate::cli::FeedbackArgs;
use crate::model::{FeedbackRecord, GrievanceStatus};
use crate::store;
use crate::thresholds;

/// Feedback path: persist the correction, nudge the matching threshold,
/// and rewrite the grievance status (the one mutable field).
pub fn run(args: FeedbackArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("grievance_dedup.sqlite"));

    let connection = store::open_database(&db_path)?;
    thresholds::seed_thresholds(&connection)?;

    let Some(summary) = store::load_grievance(&connection, args.grievance_id)? else {
        bail!("grievance {} does not exist", args.grievance_id);
    };
    let Some(original_status) = summary.status else {
        bail!("grievance {} carries an unrecognized status", args.grievance_id);
    };

    let corrected_status: GrievanceStatus = args.corrected_status.into();
    let record = FeedbackRecord {
        grievance_id: summary.id,
        matched_grievance_id: summary.matched_grievance_id,
        original_status,
        corrected_status,
        original_score: Some(summary.similarity_score),
        notes: args.notes.clone(),
    };

    let applied =
        thresholds::apply_feedback_adjustment(&connection, original_status, corrected_status)?;
    store::record_feedback(&connection, &record, applied)?;

    if corrected_status != original_status {
        store::update_grievance_status(&connection, summary.id, corrected_status)?;
    }

    info!(
        grievance_id = summary.id,
        original = original_status.as_str(),
        corrected = corrected_status.as_str(),
        applied_to_threshold = applied,
        "feedback recorded"
    );

    Ok(())
}
