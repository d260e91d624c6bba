use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::references::FetchedReference;

use crate::config::StudioConfig;
use crate::error::ProviderError;
use crate::http::{build_client, response_json_or_error, transport_error};
use crate::imaging::prepare_for_upload;
use crate::retry::RetryPolicy;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_SCORE: f64 = 10.0;

/// One verdict from a ranker. `index` points into the slice it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceScore {
    pub index: usize,
    pub score: f64,
    pub details: String,
}

/// Strategy for judging which fetched references best show the subject.
pub trait ReferenceRanker: Send + Sync {
    fn name(&self) -> &str;
    fn rank(
        &self,
        references: &[FetchedReference],
        subject: &str,
    ) -> Result<Vec<ReferenceScore>, ProviderError>;
}

/// Scores every reference equally so the selector keeps the first `k` by rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankOrderRanker;

impl ReferenceRanker for RankOrderRanker {
    fn name(&self) -> &str {
        "rank_order"
    }

    fn rank(
        &self,
        references: &[FetchedReference],
        _subject: &str,
    ) -> Result<Vec<ReferenceScore>, ProviderError> {
        Ok((0..references.len())
            .map(|index| ReferenceScore {
                index,
                score: MAX_SCORE,
                details: String::new(),
            })
            .collect())
    }
}

/// Consensus and clarity judging through the Anthropic Messages API.
pub struct ClaudeRanker {
    api_base: String,
    api_key: String,
    model: String,
    max_dim: u32,
    http: HttpClient,
}

impl ClaudeRanker {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            api_base: config.endpoints.reasoning.clone(),
            api_key: config.credentials.reasoning_key.clone().unwrap_or_default(),
            model: config.select_model.clone(),
            max_dim: config.limits.selection_max_dim,
            http: build_client(config.timeouts.select),
        }
    }

    fn instructions(subject: &str) -> String {
        format!(
            "Analyze each image for how well it represents: {subject}\n\n\
             Several images may show the same product. Judge each one on:\n\
             - consensus: does it agree with the other images on what the product looks like\n\
             - clarity: is it sharp, unobstructed and clearly the right product\n\n\
             For EACH image, provide:\n\
             - confidence_score: 0-10 (how well it matches the subject)\n\
             - matched_details: what specific elements in the image match the subject\n\n\
             Respond with ONLY a JSON array:\n\
             [\n  \
             {{\"index\": 0, \"confidence_score\": 9, \"consensus\": \"agrees with 1 and 2\", \"clarity\": \"sharp\", \"matched_details\": \"Shows exploded view with labeled bracket and bolt\"}},\n  \
             {{\"index\": 1, \"confidence_score\": 3, \"consensus\": \"outlier\", \"clarity\": \"blurry\", \"matched_details\": \"Only shows packaging, not the actual product\"}}\n\
             ]\n"
        )
    }

    /// Message content plus, for each image sent, its index in `references`.
    /// The model numbers images by send position, so undecodable references
    /// are skipped before numbering.
    fn build_content(&self, references: &[FetchedReference], subject: &str) -> (Vec<Value>, Vec<usize>) {
        let mut content = vec![json!({"type": "text", "text": Self::instructions(subject)})];
        let mut sent = Vec::new();
        for (index, reference) in references.iter().enumerate() {
            let Some(upload) =
                prepare_for_upload(&reference.bytes, &reference.content_type, self.max_dim)
            else {
                warn!(
                    "not sending rank {} for selection: {} cannot be re-encoded",
                    reference.rank(),
                    reference.content_type
                );
                continue;
            };
            let description = if reference.candidate.source_title.is_empty() {
                "None"
            } else {
                reference.candidate.source_title.as_str()
            };
            content.push(json!({
                "type": "text",
                "text": format!("\n--- Image {} ---\nDescription: {description}\n", sent.len()),
            }));
            content.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": upload.mime_type,
                    "data": BASE64.encode(&upload.bytes),
                },
            }));
            sent.push(index);
        }
        content.push(json!({
            "type": "text",
            "text": "\nRespond with ONLY the JSON array, no other text:",
        }));
        (content, sent)
    }

    fn response_text(payload: &Value) -> String {
        payload
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

impl ReferenceRanker for ClaudeRanker {
    fn name(&self) -> &str {
        "claude"
    }

    fn rank(
        &self,
        references: &[FetchedReference],
        subject: &str,
    ) -> Result<Vec<ReferenceScore>, ProviderError> {
        let (content, sent) = self.build_content(references, subject);
        if sent.is_empty() {
            return Err(ProviderError::invalid_payload(
                "Anthropic",
                "no reference could be prepared for upload",
            ));
        }
        if log::log_enabled!(log::Level::Debug) {
            let prompt_text = content
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            debug!(
                "selection prompt:\n{prompt_text}\n[+ {} image(s)]",
                sent.len()
            );
        }

        let payload = json!({
            "model": self.model,
            "max_tokens": 1000,
            "messages": [{"role": "user", "content": content}],
        });
        let response = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .map_err(|err| transport_error("Anthropic", err))?;
        let body = response_json_or_error("Anthropic", response)?;
        let text = Self::response_text(&body);
        debug!("selection response:\n{text}");
        let scores = parse_scores(&text).ok_or_else(|| {
            ProviderError::invalid_payload("Anthropic", "reply did not contain a JSON array of scores")
        })?;
        Ok(scores
            .into_iter()
            .filter_map(|score| {
                let index = *sent.get(score.index)?;
                Some(ReferenceScore { index, ..score })
            })
            .collect())
    }
}

/// Pulls the score array out of a model reply, tolerating prose around it
/// and markdown code fences.
pub fn parse_scores(text: &str) -> Option<Vec<ReferenceScore>> {
    let (start, end) = (text.find('[')?, text.rfind(']')?);
    if end <= start {
        return None;
    }
    let rows: Vec<Value> = serde_json::from_str(&text[start..=end]).ok()?;
    Some(
        rows.iter()
            .filter_map(|row| {
                let index = number_field(row, "index")?;
                if index < 0.0 || index.fract() != 0.0 {
                    return None;
                }
                Some(ReferenceScore {
                    index: index as usize,
                    score: number_field(row, "confidence_score").unwrap_or(0.0),
                    details: row
                        .get("matched_details")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                })
            })
            .collect(),
    )
}

fn number_field(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Subsequence of the input, still in rank order.
    pub references: Vec<FetchedReference>,
    pub strategy: String,
    pub fallback_reason: Option<String>,
}

impl Selection {
    pub fn ranks(&self) -> Vec<usize> {
        self.references.iter().map(FetchedReference::rank).collect()
    }
}

pub struct ReferenceSelector {
    ranker: Box<dyn ReferenceRanker>,
    policy: RetryPolicy,
    min_score: f64,
}

impl ReferenceSelector {
    pub fn new(ranker: Box<dyn ReferenceRanker>, policy: RetryPolicy, min_score: f64) -> Self {
        Self {
            ranker,
            policy,
            min_score,
        }
    }

    /// Reasoning ranker when a credential is configured, rank order otherwise.
    pub fn from_config(config: &StudioConfig) -> Self {
        let ranker: Box<dyn ReferenceRanker> = if config.has_reasoning() {
            Box::new(ClaudeRanker::new(config))
        } else {
            Box::new(RankOrderRanker)
        };
        Self::new(
            ranker,
            config.retries.select.clone(),
            config.limits.min_selection_score,
        )
    }

    pub fn ranker_name(&self) -> &str {
        self.ranker.name()
    }

    /// Never fails: any ranker problem degrades to the first `k` by rank.
    pub fn select(&self, references: &[FetchedReference], subject: &str, k: usize) -> Selection {
        let k = k.max(1);
        if references.len() <= 1 {
            return Selection {
                references: references.to_vec(),
                strategy: "passthrough".to_string(),
                fallback_reason: None,
            };
        }

        let label = format!("{} selection", self.ranker.name());
        let scores = match self.policy.run(&label, |_| self.ranker.rank(references, subject)) {
            Ok(scores) => scores,
            Err(exhausted) => {
                warn!("selection failed ({}); using first {k} by rank", exhausted.last);
                return rank_order(references, k, Some(exhausted.last.to_string()));
            }
        };

        let mut kept: Vec<&ReferenceScore> = Vec::new();
        for score in &scores {
            if score.index < references.len()
                && score.score >= self.min_score
                && !kept.iter().any(|existing| existing.index == score.index)
            {
                kept.push(score);
            }
        }
        if kept.is_empty() {
            warn!(
                "selection inconclusive: no reference scored at least {}",
                self.min_score
            );
            return rank_order(
                references,
                k,
                Some(format!("no reference scored at least {}", self.min_score)),
            );
        }

        kept.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| references[a.index].rank().cmp(&references[b.index].rank()))
        });
        kept.truncate(k);
        for score in &kept {
            info!(
                "selected rank {} (score {:.1}) {}",
                references[score.index].rank(),
                score.score,
                score.details
            );
        }
        let mut indices: Vec<usize> = kept.iter().map(|score| score.index).collect();
        indices.sort_by_key(|index| references[*index].rank());

        Selection {
            references: indices
                .into_iter()
                .map(|index| references[index].clone())
                .collect(),
            strategy: self.ranker.name().to_string(),
            fallback_reason: None,
        }
    }
}

fn rank_order(references: &[FetchedReference], k: usize, reason: Option<String>) -> Selection {
    let mut ordered = references.to_vec();
    ordered.sort_by_key(FetchedReference::rank);
    ordered.truncate(k);
    Selection {
        references: ordered,
        strategy: "rank_order".to_string(),
        fallback_reason: reason,
    }
}
