use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::model::GrievanceStatus;
use crate::similarity::Weights;
use crate::util::now_utc_string;

/// Single-step EMA nudge applied per feedback event.
pub const LEARNING_RATE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    Duplicate,
    NearDuplicate,
    CosineWeight,
    JaccardWeight,
    NgramWeight,
    MetadataWeight,
}

pub const ALL_KINDS: &[ThresholdKind] = &[
    ThresholdKind::Duplicate,
    ThresholdKind::NearDuplicate,
    ThresholdKind::CosineWeight,
    ThresholdKind::JaccardWeight,
    ThresholdKind::NgramWeight,
    ThresholdKind::MetadataWeight,
];

impl ThresholdKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::NearDuplicate => "near_duplicate",
            Self::CosineWeight => "cosine_weight",
            Self::JaccardWeight => "jaccard_weight",
            Self::NgramWeight => "ngram_weight",
            Self::MetadataWeight => "metadata_weight",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "duplicate" => Some(Self::Duplicate),
            "near_duplicate" => Some(Self::NearDuplicate),
            "cosine_weight" => Some(Self::CosineWeight),
            "jaccard_weight" => Some(Self::JaccardWeight),
            "ngram_weight" => Some(Self::NgramWeight),
            "metadata_weight" => Some(Self::MetadataWeight),
            _ => None,
        }
    }

    /// Canonical (current, min, max) seed, also the in-memory fallback.
    /// The duplicate bound uses the migration-seed value 0.85; the 0.60
    /// figure is the near-duplicate bound, keeping a non-empty
    /// NEAR_DUPLICATE band.
    pub fn defaults(self) -> (f64, f64, f64) {
        match self {
            Self::Duplicate => (0.85, 0.50, 0.95),
            Self::NearDuplicate => (0.60, 0.40, 0.80),
            Self::CosineWeight => (0.55, 0.30, 0.80),
            Self::JaccardWeight => (0.25, 0.10, 0.50),
            Self::NgramWeight => (0.15, 0.05, 0.40),
            Self::MetadataWeight => (0.05, 0.00, 0.20),
        }
    }
}

/// Batch-local copy of the classification thresholds and signal
/// weights; read once at batch start so mid-batch feedback cannot
/// shift classifications within a run.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdSnapshot {
    pub duplicate: f64,
    pub near_duplicate: f64,
    pub weights: Weights,
}

impl Default for ThresholdSnapshot {
    fn default() -> Self {
        Self {
            duplicate: ThresholdKind::Duplicate.defaults().0,
            near_duplicate: ThresholdKind::NearDuplicate.defaults().0,
            weights: Weights::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdRow {
    pub kind: ThresholdKind,
    pub current_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub adjustment_count: i64,
    pub last_adjusted_at: Option<String>,
}

/// Seed the six threshold rows if they are missing.
pub fn seed_thresholds(connection: &Connection) -> Result<()> {
    let mut statement = connection.prepare(
        "
        INSERT OR IGNORE INTO adaptive_thresholds(kind, current_value, min_value, max_value, adjustment_count)
        VALUES(?1, ?2, ?3, ?4, 0)
        ",
    )?;

    for kind in ALL_KINDS {
        let (current, min, max) = kind.defaults();
        statement.execute(params![kind.as_str(), current, min, max])?;
    }

    Ok(())
}

/// Read the current thresholds. Falls back to the canonical defaults
/// (with a warning) when the store is unreadable, and clamps the
/// near-duplicate bound below the duplicate bound.
pub fn load_snapshot(connection: &Connection) -> ThresholdSnapshot {
    let mut snapshot = ThresholdSnapshot::default();

    for kind in ALL_KINDS {
        match read_current_value(connection, *kind) {
            Ok(Some(value)) => apply_to_snapshot(&mut snapshot, *kind, value),
            Ok(None) => {}
            Err(error) => {
                warn!(
                    kind = kind.as_str(),
                    error = %error,
                    "threshold store unreadable, using default"
                );
            }
        }
    }

    if snapshot.near_duplicate > snapshot.duplicate {
        snapshot.near_duplicate = snapshot.duplicate;
    }

    snapshot
}

fn apply_to_snapshot(snapshot: &mut ThresholdSnapshot, kind: ThresholdKind, value: f64) {
    match kind {
        ThresholdKind::Duplicate => snapshot.duplicate = value,
        ThresholdKind::NearDuplicate => snapshot.near_duplicate = value,
        ThresholdKind::CosineWeight => snapshot.weights.cosine = value,
        ThresholdKind::JaccardWeight => snapshot.weights.jaccard = value,
        ThresholdKind::NgramWeight => snapshot.weights.ngram = value,
        ThresholdKind::MetadataWeight => snapshot.weights.metadata = value,
    }
}

fn read_current_value(connection: &Connection, kind: ThresholdKind) -> Result<Option<f64>> {
    let value = connection
        .query_row(
            "SELECT current_value FROM adaptive_thresholds WHERE kind = ?1",
            [kind.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn list_thresholds(connection: &Connection) -> Result<Vec<ThresholdRow>> {
    let mut statement = connection.prepare(
        "
        SELECT kind, current_value, min_value, max_value, adjustment_count, last_adjusted_at
        FROM adaptive_thresholds
        ORDER BY kind ASC
        ",
    )?;

    let mut rows = statement.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_text: String = row.get(0)?;
        let Some(kind) = ThresholdKind::parse(&kind_text) else {
            warn!(kind = %kind_text, "unknown threshold kind in store");
            continue;
        };
        out.push(ThresholdRow {
            kind,
            current_value: row.get(1)?,
            min_value: row.get(2)?,
            max_value: row.get(3)?,
            adjustment_count: row.get(4)?,
            last_adjusted_at: row.get(5)?,
        });
    }

    Ok(out)
}

/// Operator override for the signal weights, clamped to the kind's
/// bounds. Classification thresholds adjust only through feedback.
pub fn set_threshold(connection: &Connection, kind: ThresholdKind, value: f64) -> Result<f64> {
    if matches!(kind, ThresholdKind::Duplicate | ThresholdKind::NearDuplicate) {
        bail!(
            "threshold {} adjusts only via the feedback path",
            kind.as_str()
        );
    }

    let (_, min, max) = load_bounds(connection, kind)?;
    let clamped = value.clamp(min, max);

    connection.execute(
        "
        UPDATE adaptive_thresholds
        SET current_value = ?2, last_adjusted_at = ?3
        WHERE kind = ?1
        ",
        params![kind.as_str(), clamped, now_utc_string()],
    )?;

    Ok(clamped)
}

/// Which threshold a correction adjusts, and in which direction.
pub fn transition_adjustment(
    original: GrievanceStatus,
    corrected: GrievanceStatus,
) -> Option<(ThresholdKind, f64)> {
    use GrievanceStatus::{Duplicate, NearDuplicate, Unique};

    match (original, corrected) {
        (Unique, Duplicate) => Some((ThresholdKind::Duplicate, -LEARNING_RATE)),
        (Duplicate, Unique) => Some((ThresholdKind::Duplicate, LEARNING_RATE)),
        (Unique, NearDuplicate) => Some((ThresholdKind::NearDuplicate, -LEARNING_RATE)),
        (NearDuplicate, Unique) => Some((ThresholdKind::NearDuplicate, LEARNING_RATE)),
        (NearDuplicate, Duplicate) => Some((ThresholdKind::NearDuplicate, LEARNING_RATE)),
        (Duplicate, NearDuplicate) => Some((ThresholdKind::Duplicate, LEARNING_RATE)),
        _ => None,
    }
}

/// Apply one EMA adjustment for a corrected classification. Returns
/// whether a threshold was adjusted; unknown transitions are a no-op.
pub fn apply_feedback_adjustment(
    connection: &Connection,
    original: GrievanceStatus,
    corrected: GrievanceStatus,
) -> Result<bool> {
    let Some((kind, delta)) = transition_adjustment(original, corrected) else {
        info!(
            original = original.as_str(),
            corrected = corrected.as_str(),
            "no threshold transition for feedback"
        );
        return Ok(false);
    };

    let (current, min, max) = load_bounds(connection, kind)?;
    let mut updated = (current + delta).clamp(min, max);

    // keep near_duplicate <= duplicate at all times
    match kind {
        ThresholdKind::Duplicate => {
            let (near, _, _) = load_bounds(connection, ThresholdKind::NearDuplicate)?;
            updated = updated.max(near);
        }
        ThresholdKind::NearDuplicate => {
            let (duplicate, _, _) = load_bounds(connection, ThresholdKind::Duplicate)?;
            updated = updated.min(duplicate);
        }
        _ => {}
    }

    connection.execute(
        "
        UPDATE adaptive_thresholds
        SET current_value = ?2,
            adjustment_count = adjustment_count + 1,
            last_adjusted_at = ?3
        WHERE kind = ?1
        ",
        params![kind.as_str(), updated, now_utc_string()],
    )?;

    info!(
        kind = kind.as_str(),
        from = current,
        to = updated,
        "adjusted threshold from feedback"
    );

    Ok(true)
}

fn load_bounds(connection: &Connection, kind: ThresholdKind) -> Result<(f64, f64, f64)> {
    let row = connection
        .query_row(
            "SELECT current_value, min_value, max_value FROM adaptive_thresholds WHERE kind = ?1",
            [kind.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .with_context(|| format!("failed to read threshold {}", kind.as_str()))?;

    match row {
        Some(bounds) => Ok(bounds),
        None => bail!("threshold {} is not seeded", kind.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;

    fn test_connection() -> Connection {
        let connection = Connection::open_in_memory().expect("in-memory sqlite");
        store::ensure_schema(&connection).expect("schema");
        seed_thresholds(&connection).expect("seed");
        connection
    }

    #[test]
    fn defaults_keep_the_near_duplicate_band_open() {
        let snapshot = ThresholdSnapshot::default();
        assert!(snapshot.near_duplicate < snapshot.duplicate);
        assert_eq!(snapshot.duplicate, 0.85);
        assert_eq!(snapshot.near_duplicate, 0.60);
    }

    #[test]
    fn snapshot_reads_seeded_values() {
        let connection = test_connection();
        let snapshot = load_snapshot(&connection);
        assert_eq!(snapshot.duplicate, 0.85);
        assert_eq!(snapshot.near_duplicate, 0.60);
        assert_eq!(snapshot.weights.cosine, 0.55);
        assert_eq!(snapshot.weights.metadata, 0.05);
    }

    #[test]
    fn snapshot_falls_back_to_defaults_without_a_store() {
        let connection = Connection::open_in_memory().expect("in-memory sqlite");
        // no schema at all: every read fails, defaults win
        let snapshot = load_snapshot(&connection);
        assert_eq!(snapshot.duplicate, 0.85);
        assert_eq!(snapshot.near_duplicate, 0.60);
    }

    #[test]
    fn feedback_walks_the_duplicate_threshold_down_to_the_floor() {
        let connection = test_connection();
        connection
            .execute(
                "UPDATE adaptive_thresholds SET current_value = 0.80 WHERE kind = 'duplicate'",
                [],
            )
            .expect("seed starting value");

        for _ in 0..4 {
            let applied = apply_feedback_adjustment(
                &connection,
                GrievanceStatus::Unique,
                GrievanceStatus::Duplicate,
            )
            .expect("adjustment");
            assert!(applied);
        }

        let rows = list_thresholds(&connection).expect("list");
        let duplicate = rows
            .iter()
            .find(|row| row.kind == ThresholdKind::Duplicate)
            .expect("duplicate row");
        assert!((duplicate.current_value - 0.60).abs() < 1e-9);
        assert_eq!(duplicate.adjustment_count, 4);
        assert!(duplicate.last_adjusted_at.is_some());

        // further corrections stop at the near-duplicate bound
        for _ in 0..4 {
            apply_feedback_adjustment(
                &connection,
                GrievanceStatus::Unique,
                GrievanceStatus::Duplicate,
            )
            .expect("adjustment");
        }
        let snapshot = load_snapshot(&connection);
        assert!((snapshot.duplicate - 0.60).abs() < 1e-9);
        assert!(snapshot.near_duplicate <= snapshot.duplicate);
    }

    #[test]
    fn unknown_transition_is_a_no_op() {
        let connection = test_connection();
        let applied = apply_feedback_adjustment(
            &connection,
            GrievanceStatus::Unique,
            GrievanceStatus::Unique,
        )
        .expect("no-op");
        assert!(!applied);

        let snapshot = load_snapshot(&connection);
        assert_eq!(snapshot.duplicate, 0.85);
    }

    #[test]
    fn near_duplicate_upgrades_raise_the_near_threshold() {
        let connection = test_connection();
        apply_feedback_adjustment(
            &connection,
            GrievanceStatus::NearDuplicate,
            GrievanceStatus::Duplicate,
        )
        .expect("adjustment");

        let snapshot = load_snapshot(&connection);
        assert!((snapshot.near_duplicate - 0.65).abs() < 1e-9);
    }

    #[test]
    fn operator_set_covers_weights_only() {
        let connection = test_connection();

        let stored = set_threshold(&connection, ThresholdKind::CosineWeight, 0.99).expect("set");
        assert_eq!(stored, 0.80);
        let stored = set_threshold(&connection, ThresholdKind::MetadataWeight, -0.3).expect("set");
        assert_eq!(stored, 0.0);

        let snapshot = load_snapshot(&connection);
        assert_eq!(snapshot.weights.cosine, 0.80);
        assert_eq!(snapshot.weights.metadata, 0.0);

        // classification thresholds move only through feedback
        assert!(set_threshold(&connection, ThresholdKind::Duplicate, 0.90).is_err());
        assert!(set_threshold(&connection, ThresholdKind::NearDuplicate, 0.50).is_err());
        let snapshot = load_snapshot(&connection);
        assert_eq!(snapshot.duplicate, 0.85);
        assert_eq!(snapshot.near_duplicate, 0.60);
    }

    #[test]
    fn transition_table_matches_the_feedback_contract() {
        use GrievanceStatus::{Duplicate, NearDuplicate, Unique};

        assert_eq!(
            transition_adjustment(Unique, Duplicate),
            Some((ThresholdKind::Duplicate, -LEARNING_RATE))
        );
        assert_eq!(
            transition_adjustment(Duplicate, Unique),
            Some((ThresholdKind::Duplicate, LEARNING_RATE))
        );
        assert_eq!(
            transition_adjustment(Unique, NearDuplicate),
            Some((ThresholdKind::NearDuplicate, -LEARNING_RATE))
        );
        assert_eq!(
            transition_adjustment(NearDuplicate, Unique),
            Some((ThresholdKind::NearDuplicate, LEARNING_RATE))
        );
        assert_eq!(
            transition_adjustment(NearDuplicate, Duplicate),
            Some((ThresholdKind::NearDuplicate, LEARNING_RATE))
        );
        assert_eq!(
            transition_adjustment(Duplicate, NearDuplicate),
            Some((ThresholdKind::Duplicate, LEARNING_RATE))
        );
        assert_eq!(transition_adjustment(Unique, Unique), None);
    }
}
