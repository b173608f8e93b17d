//! Orchestrator process
//!
//! Main pipeline: fatal Analysis, non-fatal Code-Reading, fatal
//! Investigation, then the gated Fix-Generation / Review loop. The whole
//! pipeline races the global deadline and the run's cancellation token;
//! losing the race drops the in-flight stage.

use crate::agents::{
    feedback_from_issues, Agent, AnalysisOutput, CodeReadingInput, FixGenerationInput,
    FixGenerationOutput, InvestigationInput, InvestigationOutput, ReviewInput, ReviewSeverity,
};
use crate::context::RepairContext;
use crate::patch::FixRecommendation;
use crate::validator::{validate_fix, ValidationReport};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::core::Orchestrator;
use super::types::{AgentResults, Approach, OrchestrationResult, Phase, RepairOutcome};

/// Mutable record of one run, readable after the pipeline is dropped
#[derive(Default)]
struct RunState {
    phase: Phase,
    iterations: u32,
    agent_results: AgentResults,
}

impl RunState {
    fn enter(&mut self, phase: Phase) {
        debug!(%phase, "Entering phase");
        self.phase = phase;
    }
}

/// How the pipeline ended
struct Verdict {
    outcome: RepairOutcome,
    approach: Approach,
    fix: Option<FixRecommendation>,
    error: Option<String>,
}

impl Verdict {
    fn accepted(outcome: RepairOutcome, approach: Approach, fix: FixGenerationOutput) -> Self {
        Self {
            outcome,
            approach,
            fix: Some(fix.into_recommendation()),
            error: None,
        }
    }

    fn failed(outcome: RepairOutcome, error: impl Into<String>) -> Self {
        Self {
            outcome,
            approach: Approach::Failed,
            fix: None,
            error: Some(error.into()),
        }
    }
}

/// Last fix the loop produced
struct Candidate {
    fix: FixGenerationOutput,
    passed_gate: bool,
    rejected: bool,
}

enum Interrupt {
    Timeout,
    Cancelled,
}

fn validation_feedback(report: &ValidationReport) -> String {
    report
        .errors
        .iter()
        .map(|e| format!("[VALIDATION] {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Original content of the files `fix` touches, where known
fn files_for(fix: &FixGenerationOutput, context: &RepairContext) -> BTreeMap<String, String> {
    fix.changes
        .iter()
        .filter_map(|c| {
            context
                .file_content(&c.file)
                .map(|content| (c.file.clone(), content.to_string()))
        })
        .collect()
}

impl Orchestrator {
    /// Repair one failure, cancellable through [`Orchestrator::shutdown`]
    ///
    /// `context` is enriched in place with the sources Code-Reading fetched.
    pub async fn orchestrate(&self, context: &mut RepairContext) -> OrchestrationResult {
        let cancel = self.shutdown.child_token();
        self.orchestrate_with_cancel(context, cancel).await
    }

    /// Repair one failure, stopping early when `cancel` fires
    #[instrument(
        skip_all,
        fields(
            test_file = %context.test_file,
            repository = %context.repository.full_name(),
        )
    )]
    pub async fn orchestrate_with_cancel(
        &self,
        context: &mut RepairContext,
        cancel: CancellationToken,
    ) -> OrchestrationResult {
        let start = Instant::now();
        let mut state = RunState::default();

        info!(
            max_iterations = self.config.max_iterations,
            min_confidence = self.config.min_confidence,
            require_review = self.config.require_review,
            "Starting repair"
        );

        let finished = {
            let pipeline = self.run_pipeline(context, &mut state);
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Interrupt::Cancelled),
                () = tokio::time::sleep(self.config.total_timeout) => Err(Interrupt::Timeout),
                verdict = pipeline => Ok(verdict),
            }
        };

        let verdict = match finished {
            Ok(verdict) => verdict,
            Err(Interrupt::Timeout) => {
                let timeout_ms = self.config.total_timeout.as_millis() as u64;
                warn!(phase = %state.phase, timeout_ms, "Repair timed out");
                Verdict::failed(
                    RepairOutcome::TimedOut { phase: state.phase },
                    format!("Repair timed out after {timeout_ms}ms during {}", state.phase),
                )
            }
            Err(Interrupt::Cancelled) => {
                warn!(phase = %state.phase, "Repair cancelled");
                Verdict::failed(
                    RepairOutcome::Cancelled,
                    format!("Repair cancelled during {}", state.phase),
                )
            }
        };
        state.enter(Phase::Done);

        let total_time_ms = start.elapsed().as_millis() as u64;
        let success = verdict.fix.is_some();
        info!(
            success,
            outcome = ?verdict.outcome,
            iterations = state.iterations,
            api_calls = state.agent_results.total_api_calls(),
            tokens = state.agent_results.total_tokens(),
            duration_ms = total_time_ms,
            "Repair finished"
        );

        OrchestrationResult {
            success,
            fix: verdict.fix,
            error: verdict.error,
            total_time_ms,
            iterations: state.iterations,
            approach: verdict.approach,
            outcome: verdict.outcome,
            agent_results: state.agent_results,
        }
    }

    async fn run_pipeline(&self, context: &mut RepairContext, state: &mut RunState) -> Verdict {
        // Analysis (fatal)
        state.enter(Phase::Analyzing);
        let result = self.analysis.execute(&(), context).await;
        let analysis = result.data.clone();
        let error = result.error_message().to_string();
        state.agent_results.analysis = Some(result);
        let Some(analysis) = analysis else {
            warn!(%error, "Analysis failed");
            return self
                .fallback_or_fail(context, state, "analysis", format!("Analysis failed: {error}"))
                .await;
        };

        // Code-Reading (non-fatal)
        state.enter(Phase::Reading);
        let input = CodeReadingInput {
            test_file: context.test_file.clone(),
            selectors: analysis.selectors.clone(),
        };
        let result = self.code_reading.execute(&input, context).await;
        let code = result.data.clone();
        match &code {
            Some(code) => context.enrich(
                Some(code.test_file_content.clone()),
                code.related_files
                    .iter()
                    .map(|f| (f.path.clone(), f.content.clone())),
            ),
            None => warn!(error = result.error_message(), "Code reading failed, continuing without sources"),
        }
        state.agent_results.code_reading = Some(result);

        // Investigation (fatal)
        state.enter(Phase::Investigating);
        let input = InvestigationInput {
            analysis: analysis.clone(),
            code,
        };
        let result = self.investigation.execute(&input, context).await;
        let investigation = result.data.clone();
        let error = result.error_message().to_string();
        state.agent_results.investigation = Some(result);
        let Some(investigation) = investigation else {
            warn!(%error, "Investigation failed");
            return self
                .fallback_or_fail(
                    context,
                    state,
                    "investigation",
                    format!("Investigation failed: {error}"),
                )
                .await;
        };
        if !investigation.is_test_code_fixable {
            info!("Investigation suggests the failure is not fixable in test code, attempting anyway");
        }

        self.iterate(context, state, analysis, investigation).await
    }

    /// Fix-Generation / Review loop behind the confidence gate
    async fn iterate(
        &self,
        context: &RepairContext,
        state: &mut RunState,
        analysis: AnalysisOutput,
        investigation: InvestigationOutput,
    ) -> Verdict {
        let min_confidence = self.config.min_confidence;
        let mut feedback: Option<String> = None;
        let mut last: Option<Candidate> = None;

        for iteration in 1..=self.config.max_iterations {
            state.iterations = iteration;

            state.enter(Phase::Generating { iteration });
            let input = FixGenerationInput {
                analysis: Some(analysis.clone()),
                investigation: Some(investigation.clone()),
                previous_feedback: feedback.clone(),
            };
            let result = self.fix_generation.execute(&input, context).await;
            let generated = result.data.clone();
            if generated.is_none() {
                warn!(iteration, error = result.error_message(), "Fix generation failed");
            }
            state.agent_results.fix_generation.push(result);
            let Some(fix) = generated else {
                continue;
            };

            state.enter(Phase::Gating { iteration });
            if fix.confidence < min_confidence {
                info!(iteration, confidence = fix.confidence, min_confidence, "Fix below confidence floor");
                feedback = Some(format!(
                    "Confidence too low ({}%). Please improve the fix.",
                    fix.confidence
                ));
                last = Some(Candidate {
                    fix,
                    passed_gate: false,
                    rejected: false,
                });
                continue;
            }

            if self.config.require_review {
                state.enter(Phase::Reviewing { iteration });
                let input = ReviewInput {
                    files: files_for(&fix, context),
                    fix: fix.clone(),
                    analysis: Some(analysis.clone()),
                };
                let result = self.review.execute(&input, context).await;
                let review = result.data.clone();
                let error = result.error_message().to_string();
                state.agent_results.review.push(result);

                match review {
                    Some(review) if review.approved => {
                        info!(iteration, fix_confidence = review.fix_confidence, "Fix approved by review");
                    }
                    Some(review) => {
                        info!(iteration, issues = review.issues.len(), "Fix rejected by review");
                        let text = review.feedback();
                        feedback = Some(if text.is_empty() {
                            "[REVIEW] Fix was not approved".to_string()
                        } else {
                            text
                        });
                        last = Some(Candidate {
                            fix,
                            passed_gate: true,
                            rejected: true,
                        });
                        continue;
                    }
                    None => {
                        warn!(iteration, %error, "Review failed, falling back to deterministic checks");
                        let issues = input.deterministic_issues();
                        let rejected = issues.iter().any(|i| i.severity == ReviewSeverity::Critical);
                        feedback = Some(if issues.is_empty() {
                            format!("Review failed: {error}")
                        } else {
                            feedback_from_issues(&issues)
                        });
                        last = Some(Candidate {
                            fix,
                            passed_gate: true,
                            rejected,
                        });
                        continue;
                    }
                }
            }

            state.enter(Phase::Validating { iteration });
            let report = validate_fix(&fix.changes, &context.source_files);
            for warning in &report.warnings {
                debug!(iteration, %warning, "Validation warning");
            }
            if !report.valid {
                info!(iteration, errors = report.errors.len(), "Fix blocked by validation");
                feedback = Some(validation_feedback(&report));
                last = Some(Candidate {
                    fix,
                    passed_gate: true,
                    rejected: true,
                });
                continue;
            }

            return Verdict::accepted(RepairOutcome::Approved, Approach::Agentic, fix);
        }

        self.exhausted(context, last)
    }

    fn exhausted(&self, context: &RepairContext, last: Option<Candidate>) -> Verdict {
        let iterations = self.config.max_iterations;
        match last {
            Some(candidate) if candidate.passed_gate && !candidate.rejected => {
                let report = validate_fix(&candidate.fix.changes, &context.source_files);
                if report.valid {
                    warn!(
                        confidence = candidate.fix.confidence,
                        "Iterations exhausted, accepting last unrejected fix"
                    );
                    return Verdict::accepted(RepairOutcome::DegradedAccept, Approach::Agentic, candidate.fix);
                }
                Verdict::failed(
                    RepairOutcome::Exhausted,
                    format!("Last fix failed validation: {}", report.errors.join("; ")),
                )
            }
            _ => Verdict::failed(
                RepairOutcome::Exhausted,
                format!("No acceptable fix after {iterations} iteration(s)"),
            ),
        }
    }

    /// One unguided generation after a fatal stage failure, when enabled
    async fn fallback_or_fail(
        &self,
        context: &RepairContext,
        state: &mut RunState,
        stage: &str,
        error: String,
    ) -> Verdict {
        let outcome = RepairOutcome::StageFailed {
            stage: stage.to_string(),
        };
        if !self.config.single_shot_fallback {
            return Verdict::failed(outcome, error);
        }

        info!(stage, "Falling back to single-shot generation");
        state.enter(Phase::SingleShot);
        state.iterations = 1;
        let result = self
            .fix_generation
            .execute(&FixGenerationInput::default(), context)
            .await;
        let generated = result.data.clone();
        let generation_error = result.error_message().to_string();
        state.agent_results.fix_generation.push(result);

        match generated {
            Some(fix) if fix.confidence >= self.config.min_confidence => {
                let report = validate_fix(&fix.changes, &context.source_files);
                if report.valid {
                    info!(confidence = fix.confidence, "Single-shot fix accepted");
                    return Verdict::accepted(RepairOutcome::SingleShot, Approach::SingleShot, fix);
                }
                Verdict::failed(
                    outcome,
                    format!(
                        "{error}; single-shot fix failed validation: {}",
                        report.errors.join("; ")
                    ),
                )
            }
            Some(fix) => Verdict::failed(
                outcome,
                format!(
                    "{error}; single-shot fix confidence {}% is below {}%",
                    fix.confidence, self.config.min_confidence
                ),
            ),
            None => Verdict::failed(
                outcome,
                format!("{error}; single-shot generation failed: {generation_error}"),
            ),
        }
    }
}
