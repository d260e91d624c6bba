use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use log::{info, warn};
use studio_contracts::events::{EventWriter, PipelineEvent};
use studio_contracts::generation::GenerationRequest;
use studio_contracts::job::{display_path, JobResult};
use studio_contracts::receipts::{build_receipt, Receipt, ReceiptOutput, ReceiptReference};
use studio_contracts::references::SearchQuery;
use studio_contracts::request::JobSpec;
use uuid::Uuid;

use crate::artifacts::{ArtifactWriter, FsWriter};
use crate::assemble::{AssembledJob, ResultAssembler};
use crate::config::{Limits, StudioConfig};
use crate::error::{Result, StudioError};
use crate::fetch::{ReferenceFetcher, ScrapeNinjaClient};
use crate::generate::{GeminiGenerator, GenerationOutput, ImageGenerator};
use crate::search::{SearchStage, TavilySearch};
use crate::select::ReferenceSelector;

/// Terminal state of one job. `result` is always printed; `error`, when set,
/// decides the exit code.
#[derive(Debug)]
pub struct JobOutcome {
    pub result: JobResult,
    pub error: Option<StudioError>,
}

impl JobOutcome {
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map(StudioError::exit_code).unwrap_or(0)
    }
}

/// Search, fetch, select, generate and assemble for a single job.
pub struct Pipeline {
    search: SearchStage,
    fetcher: ReferenceFetcher,
    selector: ReferenceSelector,
    generator: Box<dyn ImageGenerator>,
    assembler: ResultAssembler,
    references_needed: usize,
    selection_size: usize,
    run_id: String,
    events: Option<EventWriter>,
    cancel: Arc<AtomicBool>,
}

/// Reference paths worth reporting even when a later stage fails.
#[derive(Default)]
struct RunState {
    reference_paths: Vec<String>,
}

impl Pipeline {
    pub fn new(
        search: SearchStage,
        fetcher: ReferenceFetcher,
        selector: ReferenceSelector,
        generator: Box<dyn ImageGenerator>,
        writer: Arc<dyn ArtifactWriter>,
        limits: &Limits,
    ) -> Self {
        Self {
            search,
            fetcher,
            selector,
            generator,
            assembler: ResultAssembler::new(writer),
            references_needed: limits.references_needed.max(1),
            selection_size: limits.selection_size.max(1),
            run_id: Uuid::new_v4().to_string(),
            events: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &StudioConfig) -> Self {
        let writer: Arc<dyn ArtifactWriter> = Arc::new(FsWriter);
        Self::new(
            SearchStage::new(
                Box::new(TavilySearch::new(config)),
                config.retries.search.clone(),
                config.limits.max_search_results,
            ),
            ReferenceFetcher::new(
                Box::new(ScrapeNinjaClient::new(config)),
                config.retries.fetch.clone(),
                config.limits.max_reference_bytes,
                writer.clone(),
            ),
            ReferenceSelector::from_config(config),
            Box::new(GeminiGenerator::new(config)),
            writer,
            &config.limits,
        )
    }

    pub fn with_events(mut self, path: impl Into<PathBuf>) -> Self {
        self.events = Some(EventWriter::new(path, self.run_id.clone()));
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Setting the flag stops the job at the next stage boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn run(&self, job: &JobSpec) -> JobOutcome {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut state = RunState::default();
        self.emit(PipelineEvent::JobStarted {
            subject: job.subject.clone(),
            style: job.directives.summary(),
            aspect_ratio: job.aspect_ratio.to_string(),
            detail: job.detail.to_string(),
            count: job.count,
            out_dir: display_path(&job.output_dir),
        });

        let outcome = match self.execute(job, &stamp, &mut state) {
            Ok(result) => JobOutcome {
                result,
                error: None,
            },
            Err(err) => {
                warn!("job failed: {}", err.report());
                JobOutcome {
                    result: JobResult::error(err.report())
                        .with_reference_images(state.reference_paths),
                    error: Some(err),
                }
            }
        };

        self.emit(PipelineEvent::JobFinished {
            status: outcome.result.status,
            message: outcome.result.message.clone(),
            files: outcome.result.files.len(),
        });
        outcome
    }

    fn execute(&self, job: &JobSpec, stamp: &str, state: &mut RunState) -> Result<JobResult> {
        self.check_cancelled("search")?;
        info!("Step 1/4: searching for reference images");
        let query = SearchQuery::new(&job.subject)?.excluding(&job.exclusions);
        let candidates = self.search.search(&query)?;
        self.emit(PipelineEvent::SearchCompleted {
            query: query.to_query_string(),
            candidates: candidates.len(),
        });
        if candidates.is_empty() {
            return Err(StudioError::NoCandidates {
                subject: job.subject.clone(),
            });
        }

        self.check_cancelled("fetch")?;
        info!("Step 2/4: fetching up to {} reference image(s)", self.references_needed);
        let cache_dir = job.refs_dir().join("cache");
        let report = self
            .fetcher
            .fetch(&candidates, self.references_needed, &cache_dir, stamp)?;
        for reference in &report.references {
            state.reference_paths.push(display_path(&reference.local_path));
            self.emit(PipelineEvent::ReferenceFetched {
                rank: reference.rank(),
                url: reference.candidate.url.clone(),
                content_type: reference.content_type.clone(),
                bytes: reference.bytes.len(),
                path: display_path(&reference.local_path),
            });
        }
        for skipped in &report.skipped {
            self.emit(PipelineEvent::ReferenceSkipped {
                rank: skipped.candidate.rank,
                url: skipped.candidate.url.clone(),
                reason: skipped.reason.clone(),
            });
        }
        if report.references.is_empty() {
            if job.directives.layout_sketch().is_none() {
                return Err(StudioError::NoReferenceAvailable {
                    tried: report.attempted,
                });
            }
            warn!("no reference fetched; continuing from the layout sketch alone");
        }

        self.check_cancelled("selection")?;
        let selection = self
            .selector
            .select(&report.references, &job.subject, self.selection_size);
        self.emit(PipelineEvent::SelectionCompleted {
            strategy: selection.strategy.clone(),
            selected_ranks: selection.ranks(),
            fallback_reason: selection.fallback_reason.clone(),
        });

        self.check_cancelled("generation")?;
        info!(
            "Step 3/4: generating with {} ({} reference(s))",
            self.generator.model(),
            selection.references.len()
        );
        let request = GenerationRequest::new(job, selection.references);
        let output = self.generator.generate(&request)?;
        self.emit(PipelineEvent::GenerationCompleted {
            model: self.generator.model().to_string(),
            images: output.result.images.len(),
            references: request.references().len(),
            token_usage: output.result.token_usage,
            feedback: output.result.model_text_feedback.clone(),
        });

        self.check_cancelled("assembly")?;
        info!("Step 4/4: saving outputs");
        let assembled =
            self.assembler
                .assemble(&output.result, request.references(), &job.output_dir, stamp)?;
        state.reference_paths = assembled.job_result.reference_images.clone();
        self.write_receipt(job, stamp, &request, &output, &assembled);
        Ok(assembled.job_result)
    }

    fn check_cancelled(&self, stage: &'static str) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(StudioError::Cancelled { stage });
        }
        Ok(())
    }

    fn emit(&self, event: PipelineEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(&event) {
            warn!("failed to record {} event: {err:#}", event.kind());
        }
    }

    /// Provenance is best effort: the images are already on disk.
    fn write_receipt(
        &self,
        job: &JobSpec,
        stamp: &str,
        request: &GenerationRequest,
        output: &GenerationOutput,
        assembled: &AssembledJob,
    ) {
        let references: Vec<ReceiptReference> = request
            .references()
            .iter()
            .zip(&assembled.reference_copies)
            .map(|(reference, copy)| ReceiptReference::from_reference(reference, copy))
            .collect();
        let grounded_by: Vec<String> = references.iter().map(|row| row.path.clone()).collect();
        let receipt = Receipt {
            run_id: self.run_id.clone(),
            subject: job.subject.clone(),
            style: job.directives.summary(),
            aspect_ratio: job.aspect_ratio.to_string(),
            detail: job.detail.to_string(),
            count: job.count,
            references,
            outputs: assembled
                .files
                .iter()
                .map(|path| ReceiptOutput {
                    path: display_path(path),
                    grounded_by: grounded_by.clone(),
                })
                .collect(),
            token_usage: output.result.token_usage,
            model_text_feedback: output.result.model_text_feedback.clone(),
        };
        let payload = build_receipt(&receipt, &output.provider_request);
        match self.assembler.write_receipt(&job.output_dir, stamp, &payload) {
            Ok(path) => info!("receipt written to {}", path.display()),
            Err(err) => warn!("failed to write receipt: {}", err.report()),
        }
    }
}
