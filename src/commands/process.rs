use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::category::{detect_category, AreaExtractor};
use crate::cli::ProcessArgs;
use crate::cluster;
use crate::dedup::{self, WorkItem};
use crate::embedding::EmbeddingClient;
use crate::extract::GrievanceExtractor;
use crate::model::{BatchRunManifest, BatchState, BatchSubmit};
use crate::normalize::TextNormalizer;
use crate::store::{self, BatchCounters};
use crate::thresholds::{self, ThresholdSnapshot};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: ProcessArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("batch-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| cache_root.join("grievance_dedup.sqlite"));
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| manifest_dir.join(format!("batch_run_{}.json", utc_compact_string(started_ts))));

    let submit = read_batch_submit(&args.input)?;

    let mut connection = store::open_database(&db_path)?;
    thresholds::seed_thresholds(&connection).context("failed to seed adaptive thresholds")?;

    let batch_id = store::create_batch(&connection, submit.user_id, submit.pdfs.len())?;
    store::mark_batch_processing(&connection, batch_id)?;

    info!(
        batch_id,
        run_id = %run_id,
        pdfs = submit.pdfs.len(),
        db = %db_path.display(),
        "starting batch processing"
    );

    let outcome = match process_batch(&mut connection, batch_id, &submit, &args) {
        Ok(outcome) => outcome,
        Err(error) => {
            store::mark_batch_failed(&connection, batch_id, &error.to_string())
                .context("failed to record batch failure")?;
            info!(batch_id, error = %error, "batch marked failed");
            return Err(error);
        }
    };

    let manifest = BatchRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        batch_id,
        status: BatchState::Completed.as_str().to_string(),
        started_at,
        completed_at: now_utc_string(),
        embedding_model: outcome.embedding_model,
        duplicate_threshold: outcome.thresholds.duplicate,
        near_duplicate_threshold: outcome.thresholds.near_duplicate,
        total_pdfs: submit.pdfs.len(),
        processed_pdfs: outcome.counters.processed_pdfs,
        total_grievances: outcome.counters.total_grievances,
        unique_count: outcome.counters.unique_count,
        duplicate_count: outcome.counters.duplicate_count,
        near_duplicate_count: outcome.counters.near_duplicate_count,
        clusters_created: outcome.clusters_created,
        rejected_candidates: outcome.rejected_candidates,
        duration_ms: started.elapsed().as_millis(),
        warnings: outcome.warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        batch_id,
        path = %manifest_path.display(),
        total = manifest.total_grievances,
        unique = manifest.unique_count,
        duplicates = manifest.duplicate_count,
        near_duplicates = manifest.near_duplicate_count,
        clusters = manifest.clusters_created,
        "batch completed"
    );

    Ok(())
}

struct BatchOutcome {
    counters: BatchCounters,
    clusters_created: usize,
    rejected_candidates: usize,
    embedding_model: String,
    thresholds: ThresholdSnapshot,
    warnings: Vec<String>,
}

fn process_batch(
    connection: &mut Connection,
    batch_id: i64,
    submit: &BatchSubmit,
    args: &ProcessArgs,
) -> Result<BatchOutcome> {
    let normalizer = TextNormalizer::new()?;
    let extractor = GrievanceExtractor::new()?;
    let areas = AreaExtractor::new()?;
    let mut warnings = Vec::new();

    let (mut items, rejected_candidates) =
        collect_work_items(submit, &normalizer, &extractor, &areas);

    if items.is_empty() {
        bail!("no valid grievances found in batch");
    }

    info!(
        batch_id,
        grievances = items.len(),
        rejected = rejected_candidates,
        "extracted grievances from batch"
    );

    let client = EmbeddingClient::new(args.embedding_endpoint.clone())?;
    embed_work_items(&client, &mut items, args.embed_batch_size.max(1))?;

    let snapshot = thresholds::load_snapshot(connection);
    info!(
        duplicate = snapshot.duplicate,
        near_duplicate = snapshot.near_duplicate,
        cosine_weight = snapshot.weights.cosine,
        "using threshold snapshot"
    );

    let historical = store::load_historical_pool(connection, store::HISTORICAL_POOL_LIMIT)?;
    debug!(candidates = historical.len(), "loaded historical pool");

    dedup::run_local_pass(&mut items, &snapshot);
    dedup::run_global_pass(&mut items, &historical, &snapshot);
    cluster::rescue_near_duplicates(&mut items, &snapshot);

    let persisted =
        store::insert_batch_grievances(connection, batch_id, &items, client.model_name())?;
    let clusters_created = store::materialize_clusters(connection, batch_id, &persisted);

    let mut counters = store::count_batch_partition(connection, batch_id)?;
    counters.processed_pdfs = submit.pdfs.len();
    store::mark_batch_completed(connection, batch_id, &counters)?;

    if rejected_candidates > 0 {
        warnings.push(format!(
            "{rejected_candidates} candidate blocks were filtered as headers or boilerplate"
        ));
    }

    Ok(BatchOutcome {
        counters,
        clusters_created,
        rejected_candidates,
        embedding_model: client.model_name().to_string(),
        thresholds: snapshot,
        warnings,
    })
}

/// Flatten the submitted PDFs into classified work items, in PDF order
/// then page order. Blocks that yield no valid grievance are counted
/// but not an error.
fn collect_work_items(
    submit: &BatchSubmit,
    normalizer: &TextNormalizer,
    extractor: &GrievanceExtractor,
    areas: &AreaExtractor,
) -> (Vec<WorkItem>, usize) {
    let mut items = Vec::new();
    let mut rejected = 0_usize;

    for (pdf_index, pdf) in submit.pdfs.iter().enumerate() {
        let pdf_area = pdf.area.trim().to_lowercase();

        for page in &pdf.grievances {
            let extracted = extractor.extract(&page.text);
            if extracted.is_empty() {
                rejected += 1;
                debug!(
                    pdf_id = pdf.pdf_id,
                    page = page.page_number,
                    "page block yielded no valid grievance"
                );
                continue;
            }

            for text in extracted {
                let processed = normalizer.normalize(&text);
                if processed.is_empty() {
                    rejected += 1;
                    debug!(pdf_id = pdf.pdf_id, page = page.page_number, "grievance empty after normalization");
                    continue;
                }

                let (category, confidence) = detect_category(&text);
                let location_details = areas.extract_area(&text);
                let area = if pdf_area.is_empty() {
                    location_details.clone().unwrap_or_default()
                } else {
                    pdf_area.clone()
                };

                items.push(WorkItem::new(
                    pdf_index,
                    pdf.pdf_id,
                    pdf.filename.clone(),
                    page.page_number,
                    text,
                    processed,
                    category,
                    confidence,
                    area,
                    location_details,
                ));
            }
        }
    }

    (items, rejected)
}

/// Fan the embedding requests out in fixed-size sub-batches; order is
/// preserved across requests.
fn embed_work_items(
    client: &EmbeddingClient,
    items: &mut [WorkItem],
    batch_size: usize,
) -> Result<()> {
    let texts: Vec<String> = items.iter().map(|item| item.original_text.clone()).collect();

    let mut vectors = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch_size) {
        let mut embedded = client
            .embed(chunk)
            .context("embedding acquisition failed")?;
        vectors.append(&mut embedded);
    }

    for (item, vector) in items.iter_mut().zip(vectors) {
        item.embedding = vector;
    }

    Ok(())
}

fn read_batch_submit(path: &PathBuf) -> Result<BatchSubmit> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let submit: BatchSubmit = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse batch submit document {}", path.display()))?;

    if submit.pdfs.is_empty() {
        bail!("batch submit document contains no PDFs");
    }

    Ok(submit)
}
