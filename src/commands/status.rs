use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::store;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("grievance_dedup.sqlite"));

    if !db_path.exists() {
        warn!(path = %db_path.display(), "no database found; nothing has been processed yet");
        return Ok(());
    }

    let connection = store::open_database(&db_path)?;
    let Some(status) = store::load_batch_status(&connection, args.batch_id)? else {
        warn!(batch_id = ?args.batch_id, "no matching batch found");
        return Ok(());
    };

    if args.json {
        let document =
            serde_json::to_string_pretty(&status).context("failed to render batch status")?;
        println!("{document}");
        return Ok(());
    }

    info!(
        batch_id = status.batch_id,
        status = %status.status,
        total_pdfs = status.total_pdfs,
        processed_pdfs = status.processed_pdfs,
        total_grievances = status.total_grievances,
        unique = status.unique_count,
        duplicates = status.duplicate_count,
        near_duplicates = status.near_duplicate_count,
        started_at = %status.started_at.unwrap_or_default(),
        completed_at = %status.completed_at.unwrap_or_default(),
        error = %status.error_message.unwrap_or_default(),
        "batch status"
    );

    Ok(())
}
