use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::references::{Candidate, FetchedReference};

use crate::artifacts::ArtifactWriter;
use crate::config::StudioConfig;
use crate::error::{FailureKind, ProviderError, Result, StudioError};
use crate::http::{build_client, response_json_or_error, transport_error};
use crate::imaging::detect_image_kind;
use crate::retry::RetryPolicy;

const SCRAPENINJA_HOST: &str = "scrapeninja.p.rapidapi.com";

/// Raw payload for one candidate URL, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait ImageFetchClient: Send + Sync {
    fn name(&self) -> &str;
    fn download(&self, url: &str) -> std::result::Result<Downloaded, ProviderError>;
}

pub struct ScrapeNinjaClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl ScrapeNinjaClient {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            api_base: config.endpoints.fetch.clone(),
            api_key: config.credentials.fetch_key.clone().unwrap_or_default(),
            http: build_client(config.timeouts.fetch),
        }
    }

    fn build_payload(url: &str) -> Value {
        json!({
            "url": url,
            "method": "GET",
            "retryNum": 1,
            "geo": "us",
        })
    }

    /// The proxy answers 200 even when the target failed; the target's own
    /// status lives in `info.statusCode`.
    fn parse_download(
        provider: &str,
        payload: &Value,
    ) -> std::result::Result<Downloaded, ProviderError> {
        let info = payload.get("info");
        let target_status = info
            .and_then(|info| info.get("statusCode"))
            .and_then(Value::as_u64)
            .unwrap_or(200);
        if target_status >= 400 {
            return Err(ProviderError::Status {
                provider: provider.to_string(),
                status: u16::try_from(target_status).unwrap_or(u16::MAX),
                body: "target returned an error status".to_string(),
            });
        }
        let content_type = info
            .and_then(|info| info.get("headers"))
            .and_then(Value::as_object)
            .and_then(|headers| {
                headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
                    .and_then(|(_, value)| value.as_str())
            })
            .map(str::to_string);
        let body = payload
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_payload(provider, "response has no body"))?;
        let bytes = BASE64
            .decode(body.trim().as_bytes())
            .map_err(|err| ProviderError::invalid_payload(provider, format!("body is not base64: {err}")))?;
        Ok(Downloaded {
            bytes,
            content_type,
        })
    }
}

impl ImageFetchClient for ScrapeNinjaClient {
    fn name(&self) -> &str {
        "ScrapeNinja"
    }

    fn download(&self, url: &str) -> std::result::Result<Downloaded, ProviderError> {
        let response = self
            .http
            .post(format!("{}/scrape", self.api_base))
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", SCRAPENINJA_HOST)
            .json(&Self::build_payload(url))
            .send()
            .map_err(|err| transport_error(self.name(), err))?;
        let payload = response_json_or_error(self.name(), response)?;
        Self::parse_download(self.name(), &payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCandidate {
    pub candidate: Candidate,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Successful downloads, in candidate rank order.
    pub references: Vec<FetchedReference>,
    pub skipped: Vec<SkippedCandidate>,
    pub attempted: usize,
}

pub struct ReferenceFetcher {
    client: Box<dyn ImageFetchClient>,
    policy: RetryPolicy,
    max_bytes: usize,
    writer: Arc<dyn ArtifactWriter>,
}

impl ReferenceFetcher {
    pub fn new(
        client: Box<dyn ImageFetchClient>,
        policy: RetryPolicy,
        max_bytes: usize,
        writer: Arc<dyn ArtifactWriter>,
    ) -> Self {
        Self {
            client,
            policy,
            max_bytes,
            writer,
        }
    }

    /// Downloads candidates in rank order until `need` references are cached
    /// or the list runs out. Bad URLs are skipped; only a rejected proxy
    /// credential or a failed cache write aborts.
    pub fn fetch(
        &self,
        candidates: &[Candidate],
        need: usize,
        cache_dir: &Path,
        stamp: &str,
    ) -> Result<FetchReport> {
        let mut ordered: Vec<&Candidate> = candidates.iter().collect();
        ordered.sort_by_key(|candidate| candidate.rank);

        let mut report = FetchReport::default();
        for candidate in ordered {
            if report.references.len() >= need {
                break;
            }
            report.attempted += 1;
            match self.fetch_one(candidate, cache_dir, stamp)? {
                Ok(reference) => {
                    info!(
                        "fetched reference rank {} ({} bytes, {})",
                        candidate.rank,
                        reference.bytes.len(),
                        reference.content_type
                    );
                    report.references.push(reference);
                }
                Err(reason) => {
                    warn!("skipping {} (rank {}): {reason}", candidate.url, candidate.rank);
                    report.skipped.push(SkippedCandidate {
                        candidate: candidate.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Outer error aborts the stage; inner error skips the candidate.
    fn fetch_one(
        &self,
        candidate: &Candidate,
        cache_dir: &Path,
        stamp: &str,
    ) -> Result<std::result::Result<FetchedReference, String>> {
        let label = format!("{} fetch rank {}", self.client.name(), candidate.rank);
        let downloaded = match self.policy.run(&label, |_| self.client.download(&candidate.url)) {
            Ok(downloaded) => downloaded,
            Err(exhausted) if exhausted.last.kind() == FailureKind::Unauthorized => {
                return Err(StudioError::Unauthorized(exhausted.last));
            }
            Err(exhausted) => return Ok(Err(exhausted.last.to_string())),
        };

        if downloaded.bytes.is_empty() {
            return Ok(Err("empty payload".to_string()));
        }
        if downloaded.bytes.len() > self.max_bytes {
            return Ok(Err(format!(
                "payload too large ({} bytes, limit {})",
                downloaded.bytes.len(),
                self.max_bytes
            )));
        }
        let Some(kind) = detect_image_kind(&downloaded.bytes) else {
            let declared = downloaded.content_type.as_deref().unwrap_or("unknown");
            return Ok(Err(format!("non-image content (declared {declared})")));
        };
        if let Some(declared) = downloaded.content_type.as_deref() {
            debug!("rank {} declared {declared}, sniffed {}", candidate.rank, kind.mime());
        }

        let local_path = cache_path(cache_dir, stamp, candidate.rank, kind.extension());
        self.writer
            .write(&local_path, &downloaded.bytes)
            .map_err(|err| StudioError::io(format!("failed to cache {}", local_path.display()), err))?;

        Ok(Ok(FetchedReference {
            candidate: candidate.clone(),
            bytes: downloaded.bytes,
            content_type: kind.mime().to_string(),
            local_path,
        }))
    }
}

fn cache_path(cache_dir: &Path, stamp: &str, rank: usize, ext: &str) -> PathBuf {
    cache_dir.join(format!("{stamp}_rank{rank:02}.{ext}"))
}
