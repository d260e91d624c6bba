use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use serde_json::Value;
use studio_contracts::generation::{GeneratedImage, GenerationResult};
use studio_contracts::job::{display_path, JobResult};
use studio_contracts::references::FetchedReference;

use crate::artifacts::ArtifactWriter;
use crate::error::{Result, StudioError};
use crate::imaging::{detect_image_kind, ImageKind};

/// Where everything for one job landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledJob {
    pub job_result: JobResult,
    pub files: Vec<PathBuf>,
    /// Copies of the references used, parallel to the `references_used` input.
    pub reference_copies: Vec<PathBuf>,
}

pub struct ResultAssembler {
    writer: Arc<dyn ArtifactWriter>,
}

impl ResultAssembler {
    pub fn new(writer: Arc<dyn ArtifactWriter>) -> Self {
        Self { writer }
    }

    /// Writes generated images as `product_<stamp>_<i>` and reference copies
    /// as `.refs/ref_<stamp>_<i>`. An empty generation still copies the
    /// references so the caller can inspect what was used.
    pub fn assemble(
        &self,
        generation: &GenerationResult,
        references_used: &[FetchedReference],
        output_dir: &Path,
        stamp: &str,
    ) -> Result<AssembledJob> {
        let refs_dir = output_dir.join(".refs");
        self.writer
            .ensure_dir(&refs_dir)
            .map_err(|err| StudioError::io(format!("failed to create {}", refs_dir.display()), err))?;

        let mut reference_copies = Vec::with_capacity(references_used.len());
        for (index, reference) in references_used.iter().enumerate() {
            let ext = detect_image_kind(&reference.bytes)
                .or_else(|| ImageKind::from_mime(&reference.content_type))
                .map(ImageKind::extension)
                .unwrap_or("img");
            let path = self.unique_path(&refs_dir, &format!("ref_{stamp}_{index}"), ext);
            self.write(&path, &reference.bytes)?;
            reference_copies.push(path);
        }
        let reference_images: Vec<String> =
            reference_copies.iter().map(|path| display_path(path)).collect();

        if generation.is_empty() {
            let message = match generation.model_text_feedback.as_deref() {
                Some(feedback) => format!("No images generated. Model response: {feedback}"),
                None => "No images generated".to_string(),
            };
            return Ok(AssembledJob {
                job_result: JobResult::error(message)
                    .with_reference_images(reference_images)
                    .with_token_usage(generation.token_usage),
                files: Vec::new(),
                reference_copies,
            });
        }

        let mut files = Vec::with_capacity(generation.images.len());
        for (index, image) in generation.images.iter().enumerate() {
            let path = self.unique_path(
                output_dir,
                &format!("product_{stamp}_{index}"),
                output_extension(image),
            );
            self.write(&path, &image.bytes)?;
            info!("saved {}", path.display());
            files.push(path);
        }

        Ok(AssembledJob {
            job_result: JobResult::success(
                files.iter().map(|path| display_path(path)).collect(),
                reference_images,
                generation.token_usage,
            ),
            files,
            reference_copies,
        })
    }

    pub fn write_receipt(&self, output_dir: &Path, stamp: &str, receipt: &Value) -> Result<PathBuf> {
        let path = output_dir.join(".refs").join(format!("receipt_{stamp}.json"));
        let bytes = serde_json::to_vec_pretty(receipt).map_err(|err| {
            StudioError::io("failed to serialize receipt", std::io::Error::other(err))
        })?;
        self.write(&path, &bytes)?;
        Ok(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.writer
            .write(path, bytes)
            .map_err(|err| StudioError::io(format!("failed to write {}", path.display()), err))
    }

    /// Never overwrites: a taken name gets a numeric suffix.
    fn unique_path(&self, dir: &Path, stem: &str, ext: &str) -> PathBuf {
        let first = dir.join(format!("{stem}.{ext}"));
        if !self.writer.exists(&first) {
            return first;
        }
        let mut suffix = 1;
        loop {
            let candidate = dir.join(format!("{stem}-{suffix}.{ext}"));
            if !self.writer.exists(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

fn output_extension(image: &GeneratedImage) -> &'static str {
    detect_image_kind(&image.bytes)
        .or_else(|| image.mime_type.as_deref().and_then(ImageKind::from_mime))
        .map(ImageKind::extension)
        .unwrap_or("png")
}
