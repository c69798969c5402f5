use anyhow::{bail, Result};
use tracing::info;

use crate::cli::ThresholdsArgs;
use crate::store;
use crate::thresholds;

pub fn run(args: ThresholdsArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("grievance_dedup.sqlite"));

    let connection = store::open_database(&db_path)?;
    thresholds::seed_thresholds(&connection)?;

    if let Some(kind) = args.set {
        let Some(value) = args.value else {
            bail!("--value is required with --set");
        };
        let kind = thresholds::ThresholdKind::from(kind);
        let stored = thresholds::set_threshold(&connection, kind, value)?;
        info!(
            kind = kind.as_str(),
            requested = value,
            stored,
            "weight overridden"
        );
    }

    for row in thresholds::list_thresholds(&connection)? {
        info!(
            kind = row.kind.as_str(),
            current = row.current_value,
            min = row.min_value,
            max = row.max_value,
            adjustments = row.adjustment_count,
            last_adjusted_at = %row.last_adjusted_at.unwrap_or_default(),
            "threshold"
        );
    }

    Ok(())
}
