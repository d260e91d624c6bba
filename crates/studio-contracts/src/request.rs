use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_OUTPUT_DIR: &str = "assets/generated/";

/// Caller input that failed validation. `field` names the offending input so
/// the caller can fix it without reading logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct InputError {
    pub field: String,
    pub message: String,
}

impl InputError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[default]
    #[serde(rename = "21:9")]
    Ultrawide,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "2:3")]
    Portrait2x3,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 8] = [
        AspectRatio::Square,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait9x16,
        AspectRatio::Landscape16x9,
        AspectRatio::Ultrawide,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait2x3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Ultrawide => "21:9",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait2x3 => "2:3",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = InputError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| {
                InputError::new(
                    "ratio",
                    format!(
                        "'{trimmed}' is not one of {}",
                        Self::ALL.map(AspectRatio::as_str).join(", ")
                    ),
                )
            })
    }
}

/// Coarse output resolution. Passed through to the generation model as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailTier {
    #[default]
    #[serde(rename = "1k")]
    Draft,
    #[serde(rename = "2k")]
    Production,
    #[serde(rename = "4k")]
    Print,
}

impl DetailTier {
    pub fn as_str(self) -> &'static str {
        match self {
            DetailTier::Draft => "1k",
            DetailTier::Production => "2k",
            DetailTier::Print => "4k",
        }
    }

    pub fn provider_size(self) -> &'static str {
        match self {
            DetailTier::Draft => "1K",
            DetailTier::Production => "2K",
            DetailTier::Print => "4K",
        }
    }
}

impl fmt::Display for DetailTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailTier {
    type Err = InputError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1k" => Ok(DetailTier::Draft),
            "2k" => Ok(DetailTier::Production),
            "4k" => Ok(DetailTier::Print),
            other => Err(InputError::new(
                "detail",
                format!("'{other}' is not one of 1k, 2k, 4k"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleKind {
    TechnicalDiagram,
    Infographic,
    MarketingShot,
    Educational,
}

impl StyleKind {
    pub fn label(self) -> &'static str {
        match self {
            StyleKind::TechnicalDiagram => "technical diagram",
            StyleKind::Infographic => "infographic",
            StyleKind::MarketingShot => "marketing shot",
            StyleKind::Educational => "educational",
        }
    }

    /// Rendering guidance folded into the generation prompt.
    pub fn guidance(self) -> &'static str {
        match self {
            StyleKind::TechnicalDiagram => {
                "clean line work on a plain white background, orthographic or exploded \
                 views, callout leader lines, no props or scenery"
            }
            StyleKind::Infographic => {
                "flat graphic layout with clear visual hierarchy, icon-like component \
                 renderings and generous whitespace"
            }
            StyleKind::MarketingShot => {
                "photorealistic studio product photography, soft key light, subtle \
                 reflections, premium e-commerce presentation"
            }
            StyleKind::Educational => {
                "approachable illustrated explainer, simplified shapes, each part \
                 clearly separated so a newcomer can follow it"
            }
        }
    }
}

impl fmt::Display for StyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StyleKind {
    type Err = InputError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ");
        match normalized.as_str() {
            "technical diagram" => Ok(StyleKind::TechnicalDiagram),
            "infographic" => Ok(StyleKind::Infographic),
            "marketing shot" => Ok(StyleKind::MarketingShot),
            "educational" => Ok(StyleKind::Educational),
            _ => Err(InputError::new(
                "style",
                format!(
                    "'{}' is not one of technical diagram, infographic, marketing shot, educational",
                    raw.trim()
                ),
            )),
        }
    }
}

/// Structured styling payload supplied as a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationNeeds {
    pub colors: Vec<String>,
    pub style: StyleKind,
    #[serde(default)]
    pub labels: Vec<String>,
    pub ascii_sketch: Option<String>,
}

impl CreationNeeds {
    const KEYS: [&'static str; 4] = ["colors", "style", "labels", "ascii_sketch"];

    pub fn from_json(raw: &str) -> Result<Self, InputError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| InputError::new("creation_needs", format!("not valid JSON: {err}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, InputError> {
        let Some(object) = value.as_object() else {
            return Err(InputError::new(
                "creation_needs",
                "expected a JSON object",
            ));
        };
        if let Some(unknown) = object
            .keys()
            .find(|key| !Self::KEYS.contains(&key.as_str()))
        {
            return Err(InputError::new(
                unknown.as_str(),
                format!("unrecognized key; expected one of {}", Self::KEYS.join(", ")),
            ));
        }

        let colors = match object.get("colors") {
            Some(Value::Array(rows)) => rows
                .iter()
                .enumerate()
                .map(|(idx, row)| {
                    let field = format!("colors[{idx}]");
                    let text = row
                        .as_str()
                        .ok_or_else(|| InputError::new(field.as_str(), "expected a string"))?;
                    validate_hex_color(text).map_err(|message| InputError::new(field, message))
                })
                .collect::<Result<Vec<String>, InputError>>()?,
            Some(_) => return Err(InputError::new("colors", "expected an array of hex strings")),
            None => return Err(InputError::new("colors", "missing required key")),
        };

        let style = match object.get("style") {
            Some(Value::String(text)) => text.parse::<StyleKind>()?,
            Some(_) => return Err(InputError::new("style", "expected a string")),
            None => return Err(InputError::new("style", "missing required key")),
        };

        let labels = match object.get("labels") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(rows)) => rows
                .iter()
                .enumerate()
                .map(|(idx, row)| {
                    row.as_str()
                        .map(str::trim)
                        .filter(|text| !text.is_empty())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            InputError::new(format!("labels[{idx}]"), "expected a non-empty string")
                        })
                })
                .collect::<Result<Vec<String>, InputError>>()?,
            Some(_) => return Err(InputError::new("labels", "expected an array of strings")),
        };

        let ascii_sketch = match object.get("ascii_sketch") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) if text.trim().is_empty() => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(_) => return Err(InputError::new("ascii_sketch", "expected a string")),
        };

        Ok(Self {
            colors,
            style,
            labels,
            ascii_sketch,
        })
    }
}

fn validate_hex_color(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    let Some(digits) = trimmed.strip_prefix('#') else {
        return Err(format!("'{trimmed}' must start with '#'"));
    };
    if !matches!(digits.len(), 3 | 6) || !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(format!("'{trimmed}' is not a #RGB or #RRGGBB colour"));
    }
    Ok(trimmed.to_string())
}

/// Free-text style instructions, structured creation needs, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDirectives {
    pub instructions: Option<String>,
    pub needs: Option<CreationNeeds>,
}

impl StyleDirectives {
    pub fn new(instructions: Option<String>, needs: Option<CreationNeeds>) -> Self {
        Self {
            instructions: instructions
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
            needs,
        }
    }

    pub fn layout_sketch(&self) -> Option<&str> {
        self.needs
            .as_ref()
            .and_then(|needs| needs.ascii_sketch.as_deref())
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(needs) = &self.needs {
            parts.push(needs.style.label().to_string());
            if !needs.colors.is_empty() {
                parts.push(format!("palette {}", needs.colors.join(" ")));
            }
            if !needs.labels.is_empty() {
                parts.push(format!("{} label(s)", needs.labels.len()));
            }
            if needs.ascii_sketch.is_some() {
                parts.push("layout sketch".to_string());
            }
        }
        if let Some(text) = &self.instructions {
            parts.push(text.clone());
        }
        if parts.is_empty() {
            return "unstyled".to_string();
        }
        parts.join("; ")
    }
}

/// One fully validated invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub subject: String,
    pub exclusions: Vec<String>,
    pub directives: StyleDirectives,
    pub aspect_ratio: AspectRatio,
    pub detail: DetailTier,
    pub count: u32,
    pub output_dir: PathBuf,
}

impl JobSpec {
    pub fn new(subject: &str, output_dir: impl Into<PathBuf>) -> Result<Self, InputError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(InputError::new("subject", "must not be empty"));
        }
        Ok(Self {
            subject: subject.to_string(),
            exclusions: Vec::new(),
            directives: StyleDirectives::default(),
            aspect_ratio: AspectRatio::default(),
            detail: DetailTier::default(),
            count: 1,
            output_dir: output_dir.into(),
        })
    }

    pub fn with_directives(mut self, directives: StyleDirectives) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_detail(mut self, detail: DetailTier) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_count(mut self, count: u32) -> Result<Self, InputError> {
        if count == 0 {
            return Err(InputError::new("count", "must be at least 1"));
        }
        self.count = count;
        Ok(self)
    }

    pub fn with_exclusions(mut self, exclusions: Vec<String>) -> Self {
        self.exclusions = exclusions
            .into_iter()
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        self
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.output_dir.join(".refs")
    }
}
