use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use studio_contracts::references::MAX_SEARCH_RESULTS;

use crate::error::{Result, StudioError};
use crate::http::non_empty;
use crate::retry::RetryPolicy;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_SELECT_MODEL: &str = "claude-haiku-4-5-20251001";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub search_key: Option<String>,
    pub fetch_key: Option<String>,
    pub generation_key: Option<String>,
    /// Optional: without it the selector degrades to rank order.
    pub reasoning_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub search: String,
    pub fetch: String,
    pub generation: String,
    pub reasoning: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            search: "https://api.tavily.com".to_string(),
            fetch: "https://scrapeninja.p.rapidapi.com".to_string(),
            generation: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            reasoning: "https://api.anthropic.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub search: Duration,
    pub fetch: Duration,
    pub select: Duration,
    pub generate: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(30),
            fetch: Duration::from_secs(30),
            select: Duration::from_secs(60),
            generate: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicies {
    pub search: RetryPolicy,
    pub fetch: RetryPolicy,
    pub select: RetryPolicy,
    pub generate: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            search: RetryPolicy::new(3, Duration::from_millis(1000)),
            fetch: RetryPolicy::new(2, Duration::from_millis(500)),
            select: RetryPolicy::once(),
            generate: RetryPolicy::new(3, Duration::from_millis(2000)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub max_search_results: usize,
    pub references_needed: usize,
    pub selection_size: usize,
    /// 0-10 scale used by the reasoning ranker.
    pub min_selection_score: f64,
    pub max_reference_bytes: usize,
    pub generation_max_dim: u32,
    pub selection_max_dim: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_search_results: MAX_SEARCH_RESULTS,
            references_needed: 3,
            selection_size: 3,
            min_selection_score: 7.0,
            max_reference_bytes: 20 * 1024 * 1024,
            generation_max_dim: 3072,
            selection_max_dim: 1024,
        }
    }
}

/// Process-wide settings, built once at startup and passed by reference into
/// every component constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
    pub image_model: String,
    pub select_model: String,
    pub timeouts: Timeouts,
    pub retries: RetryPolicies,
    pub limits: Limits,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            endpoints: Endpoints::default(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            select_model: DEFAULT_SELECT_MODEL.to_string(),
            timeouts: Timeouts::default(),
            retries: RetryPolicies::default(),
            limits: Limits::default(),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_empty(lookup(key));
        let base = |key: &str, default: String| {
            var(key)
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
        };
        let defaults = StudioConfig::default();

        let credentials = Credentials {
            search_key: var("TAVILY_API_KEY"),
            fetch_key: var("SCRAPENINJA_API_KEY"),
            generation_key: var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY")),
            reasoning_key: var("ANTHROPIC_API_KEY"),
        };
        let endpoints = Endpoints {
            search: base("TAVILY_API_BASE", defaults.endpoints.search),
            fetch: base("SCRAPENINJA_API_BASE", defaults.endpoints.fetch),
            generation: base("GEMINI_API_BASE", defaults.endpoints.generation),
            reasoning: base("ANTHROPIC_API_BASE", defaults.endpoints.reasoning),
        };
        let retries = RetryPolicies {
            search: retry_override(&var, "SEARCH", defaults.retries.search),
            fetch: retry_override(&var, "FETCH", defaults.retries.fetch),
            select: retry_override(&var, "SELECT", defaults.retries.select),
            generate: retry_override(&var, "GENERATE", defaults.retries.generate),
        };

        Self {
            credentials,
            endpoints,
            image_model: var("PRODUCT_STUDIO_IMAGE_MODEL").unwrap_or(defaults.image_model),
            select_model: var("PRODUCT_STUDIO_SELECT_MODEL").unwrap_or(defaults.select_model),
            timeouts: defaults.timeouts,
            retries,
            limits: defaults.limits,
        }
    }

    /// Reports every missing required credential at once.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.credentials.search_key.is_none() {
            missing.push("TAVILY_API_KEY not set".to_string());
        }
        if self.credentials.fetch_key.is_none() {
            missing.push("SCRAPENINJA_API_KEY not set".to_string());
        }
        if self.credentials.generation_key.is_none() {
            missing.push("GEMINI_API_KEY (or GOOGLE_API_KEY) not set".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StudioError::MissingCredentials(missing))
        }
    }

    pub fn has_reasoning(&self) -> bool {
        self.credentials.reasoning_key.is_some()
    }
}

fn retry_override<F>(var: &F, stage: &str, default: RetryPolicy) -> RetryPolicy
where
    F: Fn(&str) -> Option<String>,
{
    let attempts = var(&format!("PRODUCT_STUDIO_{stage}_RETRIES"))
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|value| value.clamp(1, 6));
    let backoff = var(&format!("PRODUCT_STUDIO_{stage}_BACKOFF_MS"))
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(|value| Duration::from_millis(value.clamp(50, 10_000)));
    RetryPolicy {
        max_attempts: attempts.unwrap_or(default.max_attempts),
        initial_backoff: backoff.unwrap_or(default.initial_backoff),
        ..default
    }
}

/// Creates the output directory and its `.refs/` cache before any network
/// call, so a bad path fails fast.
pub fn preflight_output_dir(output_dir: &Path) -> Result<()> {
    let refs = output_dir.join(".refs");
    fs::create_dir_all(&refs).map_err(|source| StudioError::OutputDir {
        path: output_dir.to_path_buf(),
        source,
    })
}
