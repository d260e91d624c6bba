use log::{debug, info};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::references::{Candidate, SearchQuery, MAX_SEARCH_RESULTS};

use crate::config::StudioConfig;
use crate::error::{FailureKind, ProviderError, Result, StudioError};
use crate::http::{build_client, response_json_or_error, transport_error};
use crate::retry::RetryPolicy;

/// Web image search returning candidates in provider relevance order.
pub trait ReferenceSearch: Send + Sync {
    fn name(&self) -> &str;

    /// One request to the provider. Retries are the caller's concern.
    fn search_once(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> std::result::Result<Vec<Candidate>, ProviderError>;
}

/// Runs a [`ReferenceSearch`] under a retry policy and maps provider failures
/// onto the pipeline's error taxonomy.
pub struct SearchStage {
    search: Box<dyn ReferenceSearch>,
    policy: RetryPolicy,
    max_results: usize,
}

impl SearchStage {
    pub fn new(search: Box<dyn ReferenceSearch>, policy: RetryPolicy, max_results: usize) -> Self {
        Self {
            search,
            policy,
            max_results: max_results.clamp(1, MAX_SEARCH_RESULTS),
        }
    }

    /// Zero hits is an empty vector, not an error.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<Candidate>> {
        let label = format!("{} search", self.search.name());
        let candidates = self
            .policy
            .run(&label, |_| self.search.search_once(query, self.max_results))
            .map_err(|exhausted| match exhausted.last.kind() {
                FailureKind::Unauthorized => StudioError::Unauthorized(exhausted.last),
                _ => StudioError::SearchUnavailable {
                    attempts: exhausted.attempts,
                    source: exhausted.last,
                },
            })?;
        info!(
            "{} returned {} candidate(s) for '{}'",
            self.search.name(),
            candidates.len(),
            query.to_query_string()
        );
        Ok(candidates)
    }
}

pub struct TavilySearch {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl TavilySearch {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            api_base: config.endpoints.search.clone(),
            api_key: config.credentials.search_key.clone().unwrap_or_default(),
            http: build_client(config.timeouts.search),
        }
    }

    fn build_payload(query: &SearchQuery, max_results: usize) -> Value {
        json!({
            "query": query.to_query_string(),
            "include_images": true,
            "include_image_descriptions": true,
            "max_results": max_results,
        })
    }

    /// `images` holds either bare URLs or `{url, description}` objects.
    fn parse_candidates(payload: &Value, max_results: usize) -> Vec<Candidate> {
        payload
            .get("images")
            .and_then(Value::as_array)
            .map(|rows| rows.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|row| match row {
                Value::String(url) => Some((url.trim().to_string(), String::new())),
                Value::Object(item) => item.get("url").and_then(Value::as_str).map(|url| {
                    let description = item
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    (url.trim().to_string(), description)
                }),
                _ => None,
            })
            .filter(|(url, _)| !url.is_empty())
            .take(max_results)
            .enumerate()
            .map(|(rank, (url, source_title))| Candidate {
                url,
                source_title,
                rank,
            })
            .collect()
    }
}

impl ReferenceSearch for TavilySearch {
    fn name(&self) -> &str {
        "Tavily"
    }

    fn search_once(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> std::result::Result<Vec<Candidate>, ProviderError> {
        let payload = Self::build_payload(query, max_results);
        debug!("Tavily search payload: {payload}");
        let response = self
            .http
            .post(format!("{}/search", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .map_err(|err| transport_error(self.name(), err))?;
        let body = response_json_or_error(self.name(), response)?;
        Ok(Self::parse_candidates(&body, max_results))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use studio_contracts::references::SearchQuery;

    use super::{SearchStage, TavilySearch};
    use crate::error::{ErrorClass, ProviderError, StudioError};
    use crate::retry::RetryPolicy;
    use crate::testing::FakeSearch;

    #[test]
    fn payload_requests_image_descriptions() {
        let query = SearchQuery::new("pipe bracket").unwrap().excluding(["toy"]);
        let payload = TavilySearch::build_payload(&query, 10);
        assert_eq!(payload["query"], json!("pipe bracket -toy"));
        assert_eq!(payload["include_images"], json!(true));
        assert_eq!(payload["include_image_descriptions"], json!(true));
        assert_eq!(payload["max_results"], json!(10));
    }

    #[test]
    fn parses_mixed_image_entries_in_rank_order() {
        let body = json!({
            "images": [
                "https://a.example/1.jpg",
                {"url": "https://b.example/2.png", "description": " exploded view "},
                {"description": "no url"},
                "",
                {"url": "https://c.example/3.webp"},
            ]
        });
        let candidates = TavilySearch::parse_candidates(&body, 10);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].url, "https://a.example/1.jpg");
        assert_eq!(candidates[1].source_title, "exploded view");
        assert_eq!(
            candidates.iter().map(|c| c.rank).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn missing_images_key_is_empty_not_error() {
        assert!(TavilySearch::parse_candidates(&json!({"results": []}), 10).is_empty());
    }

    #[test]
    fn parse_respects_max_results() {
        let body = json!({"images": ["u1", "u2", "u3"]});
        assert_eq!(TavilySearch::parse_candidates(&body, 2).len(), 2);
    }

    #[test]
    fn unauthorized_aborts_without_retry() {
        let search = FakeSearch::failing(|| ProviderError::Unauthorized {
            provider: "Tavily".to_string(),
            status: 401,
        });
        let calls = search.calls.clone();
        let stage = SearchStage::new(
            Box::new(search),
            RetryPolicy::new(3, Duration::ZERO),
            10,
        );
        let err = stage
            .search(&SearchQuery::new("bracket").unwrap())
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unauthorized);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn rate_limits_exhaust_into_search_unavailable() {
        let search = FakeSearch::failing(|| ProviderError::RateLimited {
            provider: "Tavily".to_string(),
            status: 429,
            body: String::new(),
        });
        let calls = search.calls.clone();
        let stage = SearchStage::new(
            Box::new(search),
            RetryPolicy::new(3, Duration::ZERO),
            10,
        );
        let err = stage
            .search(&SearchQuery::new("bracket").unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            StudioError::SearchUnavailable { attempts: 3, .. }
        ));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_hits_is_ok() {
        let stage = SearchStage::new(Box::new(FakeSearch::returning(Vec::new())), RetryPolicy::once(), 10);
        let found = stage.search(&SearchQuery::new("bracket").unwrap()).unwrap();
        assert!(found.is_empty());
    }
}
