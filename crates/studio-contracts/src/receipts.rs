use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::generation::TokenUsage;
use crate::references::FetchedReference;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptReference {
    pub rank: usize,
    pub url: String,
    pub source_title: String,
    pub sha256: String,
    pub path: String,
}

impl ReceiptReference {
    pub fn from_reference(reference: &FetchedReference, copied_to: &Path) -> Self {
        Self {
            rank: reference.rank(),
            url: reference.candidate.url.clone(),
            source_title: reference.candidate.source_title.clone(),
            sha256: reference.sha256(),
            path: copied_to.to_string_lossy().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptOutput {
    pub path: String,
    pub grounded_by: Vec<String>,
}

/// Provenance for one job: which photos grounded which generated files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub run_id: String,
    pub subject: String,
    pub style: String,
    pub aspect_ratio: String,
    pub detail: String,
    pub count: u32,
    pub references: Vec<ReceiptReference>,
    pub outputs: Vec<ReceiptOutput>,
    pub token_usage: TokenUsage,
    pub model_text_feedback: Option<String>,
}

pub fn build_receipt(receipt: &Receipt, provider_request: &Map<String, Value>) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    if let Ok(Value::Object(fields)) = serde_json::to_value(receipt) {
        for (key, value) in fields {
            root.insert(key, value);
        }
    }
    root.insert(
        "provider_request".to_string(),
        sanitize_payload(&Value::Object(provider_request.clone())),
    );
    Value::Object(root)
}

/// Replaces inline image payloads with a placeholder so receipts and debug
/// logs stay readable.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image_bytes" | "data" | "key" | "api_key"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
