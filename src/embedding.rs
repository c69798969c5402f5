use std::thread::sleep;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::similarity::l2_normalize;

pub const EMBEDDING_DIM: usize = 384;
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_FALLBACK_ENDPOINT: &str =
    "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2";

const MAX_ATTEMPTS: usize = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding endpoint returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("embedding response shape mismatch: {0}")]
    Shape(String),
    #[error("embedding service unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: usize, last_error: String },
}

/// Dense-vector acquisition against a primary custom endpoint with a
/// hosted-model fallback. Vectors come back unit-norm in input order.
/// There is no synthetic fallback: exhausting every attempt surfaces
/// `EmbeddingError::Unavailable` to the caller.
pub struct EmbeddingClient {
    http: Client,
    custom_endpoint: Option<String>,
    fallback_endpoint: String,
    model_name: String,
}

impl EmbeddingClient {
    pub fn new(custom_endpoint: Option<String>) -> Result<Self, EmbeddingError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            custom_endpoint: custom_endpoint
                .map(|endpoint| endpoint.trim_end_matches('/').to_string()),
            fallback_endpoint: DEFAULT_FALLBACK_ENDPOINT.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Embed `texts`, preserving input order. The custom endpoint gets a
    /// single POST; the fallback endpoint is retried with a pause and is
    /// asked to wait for the model to load.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(endpoint) = &self.custom_endpoint {
            match self.request(endpoint, &json!({ "inputs": texts })) {
                Ok(vectors) => return finish_vectors(vectors, texts.len()),
                Err(error) => {
                    warn!(endpoint = %endpoint, error = %error, "custom embedding endpoint failed, using fallback");
                }
            }
        }

        let body = json!({
            "inputs": texts,
            "options": { "wait_for_model": true },
        });

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.request(&self.fallback_endpoint, &body) {
                Ok(vectors) => return finish_vectors(vectors, texts.len()),
                Err(error) => {
                    debug!(attempt, error = %error, "fallback embedding attempt failed");
                    last_error = error.to_string();
                    if attempt < MAX_ATTEMPTS {
                        sleep(RETRY_PAUSE);
                    }
                }
            }
        }

        Err(EmbeddingError::Unavailable {
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }

    fn request(&self, endpoint: &str, body: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self.http.post(endpoint).json(body).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Server {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let value: Value = response.json()?;
        parse_embedding_matrix(&value)
    }
}

/// Accept `[[float, …], …]` or the singleton `[float, …]` shape and
/// always hand back list-of-lists.
pub fn parse_embedding_matrix(value: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let rows = value
        .as_array()
        .ok_or_else(|| EmbeddingError::Shape("response is not an array".to_string()))?;

    if rows.is_empty() {
        return Err(EmbeddingError::Shape("response array is empty".to_string()));
    }

    if rows[0].is_number() {
        return Ok(vec![parse_embedding_row(value)?]);
    }

    rows.iter().map(parse_embedding_row).collect()
}

fn parse_embedding_row(value: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let entries = value
        .as_array()
        .ok_or_else(|| EmbeddingError::Shape("row is not an array of numbers".to_string()))?;

    if entries.len() != EMBEDDING_DIM {
        return Err(EmbeddingError::Shape(format!(
            "expected {} dimensions, got {}",
            EMBEDDING_DIM,
            entries.len()
        )));
    }

    let mut row = Vec::with_capacity(EMBEDDING_DIM);
    for entry in entries {
        let number = entry
            .as_f64()
            .ok_or_else(|| EmbeddingError::Shape("non-numeric embedding value".to_string()))?;
        if !number.is_finite() {
            return Err(EmbeddingError::Shape("non-finite embedding value".to_string()));
        }
        row.push(number as f32);
    }

    Ok(row)
}

fn finish_vectors(
    mut vectors: Vec<Vec<f32>>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::Shape(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }

    for vector in &mut vectors {
        l2_normalize(vector);
    }

    Ok(vectors)
}

/// Provenance hash of the text an embedding was generated from.
pub fn embedding_text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let mut out = Vec::<f32>::with_capacity(expected_dim);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    Some(out)
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 240;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit_row() -> Vec<f64> {
        let mut row = vec![0.0; EMBEDDING_DIM];
        row[0] = 3.0;
        row[1] = 4.0;
        row
    }

    #[test]
    fn parses_list_of_lists() {
        let value = json!([unit_row(), unit_row()]);
        let matrix = parse_embedding_matrix(&value).expect("valid matrix");
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0].len(), EMBEDDING_DIM);
    }

    #[test]
    fn normalizes_singleton_to_list_of_lists() {
        let value = json!(unit_row());
        let matrix = parse_embedding_matrix(&value).expect("singleton accepted");
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].len(), EMBEDDING_DIM);
    }

    #[test]
    fn rejects_wrong_dimension() {
        let value = json!([[1.0, 2.0, 3.0]]);
        assert!(matches!(
            parse_embedding_matrix(&value),
            Err(EmbeddingError::Shape(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_and_non_array_payloads() {
        assert!(matches!(
            parse_embedding_matrix(&json!({"error": "loading"})),
            Err(EmbeddingError::Shape(_))
        ));

        let mut entries: Vec<Value> = unit_row().iter().map(|v| json!(v)).collect();
        entries[5] = Value::Null;
        assert!(matches!(
            parse_embedding_matrix(&json!([entries])),
            Err(EmbeddingError::Shape(_))
        ));
    }

    #[test]
    fn finish_vectors_normalizes_and_checks_count() {
        let row: Vec<f32> = unit_row().iter().map(|v| *v as f32).collect();
        let vectors = finish_vectors(vec![row], 1).expect("count matches");
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let row: Vec<f32> = unit_row().iter().map(|v| *v as f32).collect();
        assert!(matches!(
            finish_vectors(vec![row], 2),
            Err(EmbeddingError::Shape(_))
        ));
    }

    #[test]
    fn embedding_blob_round_trips() {
        let mut vector = vec![0.0_f32; EMBEDDING_DIM];
        vector[10] = 0.5;
        vector[383] = -0.25;
        let blob = encode_embedding_blob(&vector);
        assert_eq!(blob.len(), EMBEDDING_DIM * 4);
        assert_eq!(decode_embedding_blob(&blob, EMBEDDING_DIM), Some(vector));
        assert_eq!(decode_embedding_blob(&blob[..8], EMBEDDING_DIM), None);
    }

    #[test]
    fn text_hash_is_stable() {
        assert_eq!(
            embedding_text_hash("water supply"),
            embedding_text_hash("water supply")
        );
        assert_ne!(embedding_text_hash("a"), embedding_text_hash("b"));
    }
}
