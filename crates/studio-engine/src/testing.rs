//! In-memory fakes for the pipeline's network and file-system seams.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Map;
use studio_contracts::generation::{GenerationRequest, GenerationResult};
use studio_contracts::references::{Candidate, FetchedReference, SearchQuery};
use studio_contracts::request::JobSpec;

use crate::artifacts::ArtifactWriter;
use crate::error::{ProviderError, Result, StudioError};
use crate::fetch::{Downloaded, ImageFetchClient};
use crate::generate::{GenerationOutput, ImageGenerator};
use crate::search::ReferenceSearch;
use crate::select::{ReferenceRanker, ReferenceScore};

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 90, 90])));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode test png");
    out.into_inner()
}

pub(crate) fn candidates(count: usize) -> Vec<Candidate> {
    (0..count)
        .map(|rank| Candidate {
            url: format!("https://img{rank}.example/photo.jpg"),
            source_title: format!("photo {rank}"),
            rank,
        })
        .collect()
}

/// References with the given ranks, in the order given.
pub(crate) fn fetched(ranks: &[usize]) -> Vec<FetchedReference> {
    ranks
        .iter()
        .map(|&rank| FetchedReference {
            candidate: Candidate {
                url: format!("https://img{rank}.example/photo.jpg"),
                source_title: format!("photo {rank}"),
                rank,
            },
            bytes: png_bytes(8, 8),
            content_type: "image/png".to_string(),
            local_path: PathBuf::from(format!("cache/rank{rank:02}.png")),
        })
        .collect()
}

pub(crate) fn job_spec() -> JobSpec {
    JobSpec::new("steel pipe bracket exploded view", "out").expect("valid job")
}

pub(crate) struct FakeSearch {
    outcome: std::result::Result<Vec<Candidate>, fn() -> ProviderError>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeSearch {
    pub fn returning(found: Vec<Candidate>) -> Self {
        Self {
            outcome: Ok(found),
            calls: Arc::default(),
        }
    }

    pub fn failing(error: fn() -> ProviderError) -> Self {
        Self {
            outcome: Err(error),
            calls: Arc::default(),
        }
    }
}

impl ReferenceSearch for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    fn search_once(
        &self,
        _query: &SearchQuery,
        max_results: usize,
    ) -> std::result::Result<Vec<Candidate>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(found) => Ok(found.iter().take(max_results).cloned().collect()),
            Err(error) => Err(error()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum FakeDownload {
    Image(Vec<u8>),
    Html,
    Status(u16),
    Unauthorized,
}

#[derive(Default)]
pub(crate) struct FakeFetch {
    responses: HashMap<String, FakeDownload>,
    pub calls: Arc<AtomicUsize>,
    pub requested: Arc<Mutex<Vec<String>>>,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, download: FakeDownload) -> Self {
        self.responses.insert(url.to_string(), download);
        self
    }
}

impl ImageFetchClient for FakeFetch {
    fn name(&self) -> &str {
        "fake"
    }

    fn download(&self, url: &str) -> std::result::Result<Downloaded, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(url.to_string());
        }
        let status = |status: u16| ProviderError::Status {
            provider: "fake".to_string(),
            status,
            body: String::new(),
        };
        match self.responses.get(url) {
            Some(FakeDownload::Image(bytes)) => Ok(Downloaded {
                bytes: bytes.clone(),
                content_type: Some("image/png".to_string()),
            }),
            Some(FakeDownload::Html) => Ok(Downloaded {
                bytes: b"<!DOCTYPE html><html><body>blocked</body></html>".to_vec(),
                content_type: Some("text/html".to_string()),
            }),
            Some(FakeDownload::Status(code)) => Err(status(*code)),
            Some(FakeDownload::Unauthorized) => Err(ProviderError::Unauthorized {
                provider: "fake".to_string(),
                status: 403,
            }),
            None => Err(status(404)),
        }
    }
}

pub(crate) struct FakeRanker {
    outcome: std::result::Result<Vec<ReferenceScore>, fn() -> ProviderError>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeRanker {
    pub fn scoring(scores: Vec<ReferenceScore>) -> Self {
        Self {
            outcome: Ok(scores),
            calls: Arc::default(),
        }
    }

    pub fn failing(error: fn() -> ProviderError) -> Self {
        Self {
            outcome: Err(error),
            calls: Arc::default(),
        }
    }
}

impl ReferenceRanker for FakeRanker {
    fn name(&self) -> &str {
        "fake"
    }

    fn rank(
        &self,
        _references: &[FetchedReference],
        _subject: &str,
    ) -> std::result::Result<Vec<ReferenceScore>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(scores) => Ok(scores.clone()),
            Err(error) => Err(error()),
        }
    }
}

pub(crate) struct FakeGenerator {
    outcome: std::result::Result<GenerationResult, fn() -> StudioError>,
    pub calls: Arc<AtomicUsize>,
    /// Reference ranks seen by each call.
    pub seen_ranks: Arc<Mutex<Vec<Vec<usize>>>>,
}

impl FakeGenerator {
    pub fn returning(result: GenerationResult) -> Self {
        Self {
            outcome: Ok(result),
            calls: Arc::default(),
            seen_ranks: Arc::default(),
        }
    }

    pub fn failing(error: fn() -> StudioError) -> Self {
        Self {
            outcome: Err(error),
            calls: Arc::default(),
            seen_ranks: Arc::default(),
        }
    }
}

impl ImageGenerator for FakeGenerator {
    fn model(&self) -> &str {
        "fake-image"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_ranks.lock() {
            seen.push(request.references().iter().map(FetchedReference::rank).collect());
        }
        match &self.outcome {
            Ok(result) => Ok(GenerationOutput {
                result: result.clone(),
                provider_request: Map::new(),
            }),
            Err(error) => Err(error()),
        }
    }
}

#[derive(Default)]
pub(crate) struct MemoryWriter {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryWriter {
    pub fn contains(&self, path: &Path) -> bool {
        self.read(path).is_some()
    }

    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().ok()?.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or_default()
    }
}

impl ArtifactWriter for MemoryWriter {
    fn ensure_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .map_err(|_| io::Error::other("memory writer poisoned"))?
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.contains(path)
    }
}
