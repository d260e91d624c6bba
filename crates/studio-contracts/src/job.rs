use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::generation::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

/// The single record printed to stdout for every invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub files: Vec<String>,
    pub reference_images: Vec<String>,
    pub token_usage: TokenUsage,
    pub message: String,
}

impl JobResult {
    pub fn success(
        files: Vec<String>,
        reference_images: Vec<String>,
        token_usage: TokenUsage,
    ) -> Self {
        let message = format!("Generated {} image(s)", files.len());
        Self {
            status: JobStatus::Success,
            files,
            reference_images,
            token_usage,
            message,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            files: Vec::new(),
            reference_images: Vec::new(),
            token_usage: TokenUsage::default(),
            message: message.into(),
        }
    }

    pub fn with_reference_images(mut self, reference_images: Vec<String>) -> Self {
        self.reference_images = reference_images;
        self
    }

    pub fn with_token_usage(mut self, token_usage: TokenUsage) -> Self {
        self.token_usage = token_usage;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|err| {
            format!(
                "{{\"status\":\"error\",\"files\":[],\"reference_images\":[],\"token_usage\":{{\"input\":0,\"output\":0,\"total\":0}},\"message\":\"result serialization failed: {}\"}}",
                err.to_string().replace('"', "'")
            )
        })
    }
}

pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{JobResult, JobStatus};
    use crate::generation::TokenUsage;

    #[test]
    fn success_json_has_expected_shape() -> anyhow::Result<()> {
        let result = JobResult::success(
            vec!["out/product_1.png".to_string()],
            vec!["out/.refs/ref_1.jpg".to_string()],
            TokenUsage {
                input: 10,
                output: 20,
                total: 30,
            },
        );
        let parsed: Value = serde_json::from_str(&result.to_json())?;
        assert_eq!(
            parsed,
            json!({
                "status": "success",
                "files": ["out/product_1.png"],
                "reference_images": ["out/.refs/ref_1.jpg"],
                "token_usage": {"input": 10, "output": 20, "total": 30},
                "message": "Generated 1 image(s)",
            })
        );
        Ok(())
    }

    #[test]
    fn error_result_keeps_reference_images() {
        let result = JobResult::error("no images generated")
            .with_reference_images(vec!["ref.png".to_string()]);
        assert_eq!(result.status, JobStatus::Error);
        assert!(result.files.is_empty());
        assert_eq!(result.reference_images, vec!["ref.png"]);
        assert!(!result.is_success());
    }
}
