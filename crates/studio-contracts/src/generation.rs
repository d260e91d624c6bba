use serde::{Deserialize, Serialize};

use crate::references::FetchedReference;
use crate::request::{AspectRatio, DetailTier, JobSpec, StyleDirectives};

/// Everything the generator needs for one call. Built once per job and only
/// ever read afterwards, so a failed call can be replayed from the receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    subject: String,
    directives: StyleDirectives,
    detail: DetailTier,
    aspect_ratio: AspectRatio,
    references: Vec<FetchedReference>,
    count: u32,
}

impl GenerationRequest {
    pub fn new(job: &JobSpec, references: Vec<FetchedReference>) -> Self {
        Self {
            subject: job.subject.clone(),
            directives: job.directives.clone(),
            detail: job.detail,
            aspect_ratio: job.aspect_ratio,
            references,
            count: job.count.max(1),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn directives(&self) -> &StyleDirectives {
        &self.directives
    }

    pub fn detail(&self) -> DetailTier {
        self.detail
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn references(&self) -> &[FetchedReference] {
        &self.references
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Output of one generation call. An empty `images` list is a valid answer
/// (for example a safety refusal) and is reported, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    pub images: Vec<GeneratedImage>,
    pub token_usage: TokenUsage,
    pub model_text_feedback: Option<String>,
}

impl GenerationResult {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
