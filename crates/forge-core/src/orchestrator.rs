//! Mutation Orchestrator
//!
//! Drives one task through generate → apply → extract interface →
//! adversarial verify → statistical decision, with bounded retries.
//! Generated code that breaches the quality thresholds is sent back for
//! repair before it is ever written.
//!
//! # Guarantees
//! - A target is only ever mutated while this pipeline holds its guard lease.
//! - Every attempt that does not commit leaves the target byte-identical to
//!   its content before the attempt.
//! - Backups, generated test files and session scratch directories are gone
//!   when [`Orchestrator::run`] returns.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use forge_guard::{Acquire, GuardError, StabilityGuard, SystemClock};
use forge_sandbox::{tail, CancelToken, ExecRequest, Sandbox, SandboxReport};
use forge_sprt::{Decision, SequentialValidator, Trial, Verdict};

use crate::backup::Backup;
use crate::capability::{CodeGenerator, GenerationRequest, TestGenerator, TestPlan, TestRequest};
use crate::config::ForgeConfig;
use crate::error::{CapabilityError, ForgeError};
use crate::events::{EventSink, ProgressEvent};
use crate::journal::FailureJournal;
use crate::prompt;
use crate::quality;
use crate::session::{ObservationError, SessionScratch, OBSERVATIONS_ENV};
use crate::state_machine::{validate_transition, Phase};
use crate::tasks::TaskSource;
use crate::types::{Commit, MutationTask, Outcome, SessionId};

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    root: PathBuf,
    config: ForgeConfig,
    generator: Option<Arc<dyn CodeGenerator>>,
    tester: Option<Arc<dyn TestGenerator>>,
    sandbox: Option<Arc<Sandbox>>,
    guard: Option<StabilityGuard>,
    tasks: Option<Arc<dyn TaskSource>>,
}

impl OrchestratorBuilder {
    /// Builder for the project at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Configuration; defaults otherwise
    #[must_use]
    pub fn config(mut self, config: ForgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Code generator (required)
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Adversarial test generator (required)
    #[must_use]
    pub fn test_generator(mut self, tester: Arc<dyn TestGenerator>) -> Self {
        self.tester = Some(tester);
        self
    }

    /// Sandbox to verify in; defaults to a native one
    #[must_use]
    pub fn sandbox(mut self, sandbox: Arc<Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Guard to consult; defaults to one over the project root
    #[must_use]
    pub fn guard(mut self, guard: StabilityGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Task source consulted by [`Orchestrator::run_next`] and notified on commit
    #[must_use]
    pub fn tasks(mut self, tasks: Arc<dyn TaskSource>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Finish construction
    ///
    /// # Errors
    /// [`ForgeError::Config`] when a capability is missing or the config is
    /// invalid, [`ForgeError::Io`] when the root does not exist.
    pub fn build(self) -> Result<Orchestrator, ForgeError> {
        self.config.validate()?;
        let generator = self
            .generator
            .ok_or_else(|| ForgeError::Config("no code generator configured".into()))?;
        let tester = self
            .tester
            .ok_or_else(|| ForgeError::Config("no test generator configured".into()))?;
        let root = std::fs::canonicalize(&self.root).map_err(|e| ForgeError::io(&self.root, e))?;
        let guard = self.guard.unwrap_or_else(|| {
            StabilityGuard::with_config(&root, self.config.guard.clone(), Arc::new(SystemClock))
        });
        let sandbox = self
            .sandbox
            .unwrap_or_else(|| Arc::new(Sandbox::native(self.config.sandbox.clone())));
        Ok(Orchestrator {
            journal: FailureJournal::new(&root),
            root,
            config: self.config,
            generator,
            tester,
            sandbox,
            guard,
            tasks: self.tasks,
        })
    }
}

/// Verified mutation pipeline over one project
pub struct Orchestrator {
    root: PathBuf,
    config: ForgeConfig,
    generator: Arc<dyn CodeGenerator>,
    tester: Arc<dyn TestGenerator>,
    sandbox: Arc<Sandbox>,
    guard: StabilityGuard,
    tasks: Option<Arc<dyn TaskSource>>,
    journal: FailureJournal,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("sandbox", &self.sandbox.mode())
            .finish_non_exhaustive()
    }
}

/// Running pipeline started by [`Orchestrator::spawn`]
#[derive(Debug)]
pub struct PipelineHandle {
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    cancel: CancelToken,
    join: JoinHandle<Result<Commit, ForgeError>>,
}

impl PipelineHandle {
    /// Next progress event; `None` once the pipeline has finished
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token cancelling this pipeline
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the result
    ///
    /// # Errors
    /// The pipeline's error, or [`ForgeError::Join`] if its task panicked.
    pub async fn join(self) -> Result<Commit, ForgeError> {
        self.join
            .await
            .map_err(|e| ForgeError::Join(e.to_string()))?
    }
}

impl Orchestrator {
    /// Start building
    pub fn builder(root: impl Into<PathBuf>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(root)
    }

    /// Canonical project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Guard consulted before every edit
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &StabilityGuard {
        &self.guard
    }

    /// Run `task` to completion, streaming progress into `events`.
    ///
    /// The last event sent is always [`ProgressEvent::Finished`].
    ///
    /// # Errors
    /// - [`ForgeError::FileLocked`]: the guard refused the file; nothing was touched
    /// - [`ForgeError::Exhausted`]: every attempt failed; the file is restored
    /// - [`ForgeError::Cancelled`]: cancelled; the file is restored
    /// - [`ForgeError::Io`] and others: unrecoverable failures
    pub async fn run(
        &self,
        task: MutationTask,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<Commit, ForgeError> {
        let span = tracing::info_span!("forge", task = %task.id, file = %task.target.display());
        let result = self.pipeline(&task, events, cancel).instrument(span).await;

        let (status, outcome) = match &result {
            Ok(commit) => (
                "success",
                Outcome::success(format!(
                    "committed {} on attempt {}: {}",
                    commit.target.display(),
                    commit.attempt,
                    commit.verdict
                )),
            ),
            Err(e @ ForgeError::Exhausted { .. }) => ("failure", Outcome::failure(e.to_string())),
            Err(e) => ("error", Outcome::error(e.to_string())),
        };
        metrics::counter!("forge_outcomes_total", "status" => status).increment(1);
        events.finish(outcome);
        result
    }

    /// Take the next task from the task source and run it.
    ///
    /// Returns `Ok(None)` when the source is empty. The last event sent is
    /// always [`ProgressEvent::Finished`], also when the source fails.
    ///
    /// # Errors
    /// [`ForgeError::Config`] without a task source, otherwise as [`Orchestrator::run`].
    pub async fn run_next(
        &self,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<Option<Commit>, ForgeError> {
        let next = match &self.tasks {
            Some(source) => source.next_task().await,
            None => Err(ForgeError::Config("no task source configured".into())),
        };
        match next {
            Ok(Some(task)) => self.run(task, events, cancel).await.map(Some),
            Ok(None) => {
                events.finish(Outcome::success("no open tasks"));
                Ok(None)
            }
            Err(e) => {
                tracing::error!("task source failed: {}", e);
                events.finish(Outcome::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Run `task` on a tokio task
    pub fn spawn(self: &Arc<Self>, task: MutationTask) -> PipelineHandle {
        let (sink, events) = EventSink::channel();
        let cancel = CancelToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { this.run(task, &sink, &token).await });
        PipelineHandle {
            events,
            cancel,
            join,
        }
    }

    async fn pipeline(
        &self,
        task: &MutationTask,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<Commit, ForgeError> {
        let (relative, absolute) = match self.resolve(&task.target) {
            Ok(paths) => paths,
            Err(e) => {
                events.progress(0, Phase::Aborted, e.to_string());
                return Err(e);
            }
        };
        let mut run = Run {
            task,
            events,
            relative,
            absolute,
            phase: Phase::Orienting,
            attempt: 0,
            prior_error: None,
            prior_code: None,
            touched: false,
        };
        run.note(format!("target {}", run.relative.display()));

        // one holder per run, so the same task started twice still contends
        let holder = format!("{}/{}", task.id, SessionId::new().0.simple());
        let acquired = {
            let path = run.relative.clone();
            let holder = holder.clone();
            self.guarded(move |guard| guard.try_acquire(&path, &holder)).await
        };
        match acquired {
            Ok(Acquire::Granted) => {}
            Ok(Acquire::Locked) => {
                return Err(run.abort(ForgeError::FileLocked {
                    path: run.relative.clone(),
                    holder: None,
                }))
            }
            Ok(Acquire::Busy { holder }) => {
                return Err(run.abort(ForgeError::FileLocked {
                    path: run.relative.clone(),
                    holder: Some(holder),
                }))
            }
            Err(e) => return Err(run.abort(e)),
        }
        let lease = LeaseRelease {
            guard: self.guard.clone(),
            path: run.relative.clone(),
            holder,
            armed: true,
        };

        let created = !run.absolute.exists();
        let result = match self.prepare_target(&run.absolute, created).await {
            Ok(()) => self.drive(&mut run, cancel).await,
            Err(e) => Err(e),
        };
        let result = match result {
            Ok(commit) => Ok(commit),
            Err(e) => Err(run.abort(e)),
        };

        let exhausted = matches!(result, Err(ForgeError::Exhausted { .. }));
        let mut stable = true;
        if result.is_err() && created {
            if let Err(e) = tokio::fs::remove_file(&run.absolute).await {
                tracing::warn!(path = %run.absolute.display(), "failed to remove created target: {}", e);
            }
        } else if run.touched && (result.is_ok() || exhausted) {
            stable = self.record_edit(&run).await;
        }
        lease.release().await;

        let mut result = result;
        if let Ok(commit) = &mut result {
            commit.stable = stable;
            if let Some(tasks) = &self.tasks {
                match tasks.mark_complete(task).await {
                    Ok(true) => run.note("task marked complete"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("task source not updated: {}", e),
                }
            }
        }
        result
    }

    /// Attempt loop; runs with the lease held
    async fn drive(&self, run: &mut Run<'_>, cancel: &CancelToken) -> Result<Commit, ForgeError> {
        let max = self.config.pipeline.max_retries;
        for attempt in 1..=max {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled);
            }
            run.attempt = attempt;
            match self.attempt(run, cancel).await? {
                AttemptOutcome::Accepted {
                    session,
                    verdict,
                    simulated,
                } => {
                    run.enter(Phase::Committed, format!("accepted: {verdict}"))?;
                    tracing::info!(attempt, session = %session, "mutation committed");
                    return Ok(Commit {
                        task: run.task.id,
                        target: run.relative.clone(),
                        attempt,
                        session,
                        verdict,
                        simulated,
                        stable: true,
                    });
                }
                AttemptOutcome::Failed {
                    session,
                    reason,
                    rejected_code,
                } => {
                    tracing::warn!(attempt, session = %session, "attempt failed");
                    self.journal.append(&run.relative, attempt, &session, &reason);
                    run.prior_error = Some(reason);
                    if rejected_code.is_some() {
                        run.prior_code = rejected_code;
                    }
                }
            }
        }
        let last_error = run.prior_error.clone().unwrap_or_default();
        run.enter(Phase::Exhausted, format!("all {max} attempts failed"))?;
        Err(ForgeError::Exhausted {
            path: run.relative.clone(),
            attempts: max,
            last_error,
        })
    }

    async fn attempt(
        &self,
        run: &mut Run<'_>,
        cancel: &CancelToken,
    ) -> Result<AttemptOutcome, ForgeError> {
        let session = SessionId::new();
        let max = self.config.pipeline.max_retries;
        run.enter(
            Phase::Generating,
            format!("attempt {}/{max}: requesting code", run.attempt),
        )?;
        metrics::counter!("forge_attempts_total").increment(1);

        let current = tokio::fs::read_to_string(&run.absolute)
            .await
            .map_err(|e| ForgeError::io(&run.absolute, e))?;
        let code = match self.generate(run, &current, cancel).await? {
            Generated::Code(code) => code,
            Generated::Failed(reason) => {
                run.note(reason.clone());
                return Ok(AttemptOutcome::Failed {
                    session,
                    reason,
                    rejected_code: None,
                });
            }
        };

        run.enter(
            Phase::Applying,
            format!("writing {} bytes (session {session})", code.len()),
        )?;
        let backup =
            Backup::create(&run.absolute, &session).map_err(|e| ForgeError::io(&run.absolute, e))?;
        tokio::fs::write(&run.absolute, &code)
            .await
            .map_err(|e| ForgeError::io(&run.absolute, e))?;
        run.touched = true;

        match self.verify_and_decide(run, &session, &code, cancel).await {
            Ok(Decided::Accept { verdict, simulated }) => {
                if let Err(e) = backup.discard() {
                    tracing::warn!(path = %run.absolute.display(), "backup not removed: {}", e);
                }
                Ok(AttemptOutcome::Accepted {
                    session,
                    verdict,
                    simulated,
                })
            }
            Ok(Decided::Reject { reason, logic }) => {
                run.enter(Phase::RollingBack, "restoring previous content")?;
                backup
                    .restore()
                    .map_err(|e| ForgeError::io(&run.absolute, e))?;
                Ok(AttemptOutcome::Failed {
                    session,
                    reason,
                    rejected_code: logic.then_some(code),
                })
            }
            Err(e) => {
                if let Err(restore) = backup.restore() {
                    tracing::error!(path = %run.absolute.display(), "rollback failed: {}", restore);
                }
                Err(e)
            }
        }
    }

    /// Generate, then regenerate while the quality check finds breaches
    async fn generate(
        &self,
        run: &Run<'_>,
        current: &str,
        cancel: &CancelToken,
    ) -> Result<Generated, ForgeError> {
        let mut request = GenerationRequest {
            task: run.task.description.clone(),
            target: run.relative.clone(),
            file_content: current.to_string(),
            prior_error: run.prior_error.clone(),
            prior_code: run.prior_code.clone(),
            attempt: run.attempt,
        };
        let quality = &self.config.quality;
        let mut repairs = 0;
        loop {
            let code = match self.generate_once(&request, current, cancel).await? {
                Generated::Code(code) => code,
                Generated::Failed(reason) => {
                    // a failed repair falls back to the breaching code
                    return Ok(match request.prior_code.take().filter(|_| repairs > 0) {
                        Some(code) => {
                            run.note(format!("repair failed, applying previous code: {reason}"));
                            Generated::Code(code)
                        }
                        None => Generated::Failed(reason),
                    });
                }
            };
            let breaches = quality::assess(&run.relative, &code, quality);
            if breaches.is_empty() {
                return Ok(Generated::Code(code));
            }
            metrics::counter!("forge_quality_breaches_total").increment(breaches.len() as u64);
            let summary = breaches
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            if repairs >= quality.repair_rounds {
                run.note(format!("applying despite quality breaches: {summary}"));
                return Ok(Generated::Code(code));
            }
            repairs += 1;
            run.note(format!("quality check failed, regenerating: {summary}"));
            tracing::info!(attempt = run.attempt, breaches = breaches.len(), "quality repair requested");
            request.prior_error = Some(quality::repair_prompt(&breaches));
            request.prior_code = Some(code);
        }
    }

    async fn generate_once(
        &self,
        request: &GenerationRequest,
        current: &str,
        cancel: &CancelToken,
    ) -> Result<Generated, ForgeError> {
        let timeout = self.config.pipeline.generation_timeout();
        let reply = tokio::select! {
            () = cancel.cancelled() => return Err(ForgeError::Cancelled),
            reply = tokio::time::timeout(timeout, self.generator.generate(request)) => reply,
        };
        let reply = match reply {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Ok(Generated::Failed(format!("Code generation failed: {e}"))),
            Err(_) => {
                return Ok(Generated::Failed(format!(
                    "Code generation failed: {}",
                    CapabilityError::Timeout(timeout)
                )))
            }
        };
        Ok(match prompt::extract_code(&reply) {
            None => Generated::Failed("No code received".into()),
            Some(code) if code.trim() == current.trim() => {
                Generated::Failed("No change produced: the reply equals the current file".into())
            }
            Some(code) => Generated::Code(code),
        })
    }

    async fn verify_and_decide(
        &self,
        run: &mut Run<'_>,
        session: &SessionId,
        code: &str,
        cancel: &CancelToken,
    ) -> Result<Decided, ForgeError> {
        run.enter(Phase::ExtractingInterface, "building blinded interface")?;
        let summary = forge_interface::summarize(&run.relative, code);
        if let Some(reason) = &summary.fallback_reason {
            run.note(format!("using full source: {reason}"));
        } else {
            run.note(format!("{} declarations", summary.declarations.len()));
        }

        run.enter(Phase::AdversarialVerify, "requesting adversarial tests")?;
        let mut scratch =
            SessionScratch::create(&self.root, session).map_err(|e| ForgeError::io(&self.root, e))?;
        let (logs, simulated) = match self
            .verify(run, &mut scratch, session, &summary.render(), cancel)
            .await?
        {
            Verification::Observed { logs, simulated } => (logs, simulated),
            Verification::StruckOut(reason) => {
                return Ok(Decided::Reject {
                    reason: format!("Verification infrastructure failure: {reason}"),
                    logic: false,
                })
            }
        };

        run.enter(Phase::StatisticalDecision, "evaluating observations")?;
        let tail_chars = self.config.pipeline.log_tail_chars;
        match self.evaluate(&scratch) {
            Ok(verdict) if verdict.decision == Decision::Accept => {
                Ok(Decided::Accept { verdict, simulated })
            }
            Ok(verdict) => {
                run.note(verdict.to_string());
                Ok(Decided::Reject {
                    reason: prompt::rejection_digest(&verdict, &logs, tail_chars),
                    logic: true,
                })
            }
            Err(problem) => {
                run.note(problem.clone());
                Ok(Decided::Reject {
                    reason: format!(
                        "Logic verification failed: {problem}.\nTest logs:\n{}",
                        tail(&logs, tail_chars)
                    ),
                    logic: true,
                })
            }
        }
    }

    /// Strike loop of the adversarial phase
    async fn verify(
        &self,
        run: &Run<'_>,
        scratch: &mut SessionScratch,
        session: &SessionId,
        interface: &str,
        cancel: &CancelToken,
    ) -> Result<Verification, ForgeError> {
        let max = self.config.pipeline.max_strikes;
        let mut strikes = 0;
        let mut last_error: Option<String> = None;
        while strikes < max {
            match self
                .verification_round(run, scratch, session, interface, last_error.clone(), cancel)
                .await?
            {
                Round::Observed { logs, simulated } => {
                    return Ok(Verification::Observed { logs, simulated })
                }
                Round::Strike(reason) => {
                    strikes += 1;
                    metrics::counter!("forge_strikes_total").increment(1);
                    let headline = reason.lines().next().unwrap_or_default();
                    run.note(format!("strike {strikes}/{max}: {headline}"));
                    tracing::warn!(session = %session, strikes, "verification strike: {}", headline);
                    scratch.remove_tests();
                    last_error = Some(reason);
                }
            }
        }
        Ok(Verification::StruckOut(last_error.unwrap_or_default()))
    }

    async fn verification_round(
        &self,
        run: &Run<'_>,
        scratch: &mut SessionScratch,
        session: &SessionId,
        interface: &str,
        prior_error: Option<String>,
        cancel: &CancelToken,
    ) -> Result<Round, ForgeError> {
        let pipeline = &self.config.pipeline;
        let observation_path = scratch.observation_rel();
        let request = TestRequest {
            interface: interface.to_string(),
            task: run.task.description.clone(),
            target: run.relative.clone(),
            session: session.short(),
            directive: prompt::test_directive(pipeline.min_trials, &observation_path),
            observation_path,
            prior_error,
        };
        let timeout = pipeline.generation_timeout();
        let payload = tokio::select! {
            () = cancel.cancelled() => return Err(ForgeError::Cancelled),
            reply = tokio::time::timeout(timeout, self.tester.generate_tests(&request)) => reply,
        };
        let payload = match payload {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => return Ok(Round::Strike(format!("Structure fault: {e}"))),
            Err(_) => {
                return Ok(Round::Strike(format!(
                    "Structure fault: {}",
                    CapabilityError::Timeout(timeout)
                )))
            }
        };
        let plan = match TestPlan::from_value(payload) {
            Ok(plan) => plan,
            Err(e) => return Ok(Round::Strike(format!("Structure fault: {e}"))),
        };
        let test_file = match plan.test_file(&run.relative) {
            Ok(path) => path,
            Err(e) => return Ok(Round::Strike(format!("Structure fault: {e}"))),
        };
        if let Err(e) = scratch.write_test(&test_file, &plan.test_code) {
            return Ok(Round::Strike(format!("Structure fault: test file not written: {e}")));
        }
        scratch.clear_observations();

        let lint = self
            .execute(&plan.lint_command, scratch, pipeline.lint_timeout(), cancel)
            .await?;
        if lint.timed_out {
            return Ok(Round::Strike(format!(
                "Linter timeout after {}s.",
                pipeline.lint_timeout_secs
            )));
        }
        if !lint.success() {
            let output = if lint.stderr.trim().is_empty() {
                &lint.stdout
            } else {
                &lint.stderr
            };
            return Ok(Round::Strike(format!(
                "Linter error:\n{}",
                tail(output, pipeline.log_tail_chars)
            )));
        }
        run.note("lint passed");

        let test = self
            .execute(&plan.test_command, scratch, pipeline.test_timeout(), cancel)
            .await?;
        if test.timed_out {
            return Ok(Round::Strike(format!(
                "Test execution timeout after {}s.",
                pipeline.test_timeout_secs
            )));
        }
        if test.exit_code.is_none() {
            return Ok(Round::Strike(format!(
                "Test process crashed.\n{}",
                tail(&test.combined(), pipeline.log_tail_chars)
            )));
        }
        if !scratch.has_observations() {
            return Ok(Round::Strike(format!(
                "Observation artifact missing (process crash?).\n{}",
                tail(&test.combined(), pipeline.log_tail_chars)
            )));
        }
        run.note(format!(
            "tests exited with {}",
            test.exit_code.unwrap_or_default()
        ));
        Ok(Round::Observed {
            logs: test.combined(),
            simulated: lint.simulated || test.simulated,
        })
    }

    async fn execute(
        &self,
        command: &str,
        scratch: &SessionScratch,
        timeout: std::time::Duration,
        cancel: &CancelToken,
    ) -> Result<SandboxReport, ForgeError> {
        let request = ExecRequest::new(command, &self.root)
            .with_timeout(timeout)
            .with_writable(scratch.relative_dir())
            .with_env(OBSERVATIONS_ENV, scratch.observation_rel());
        let report = match self.sandbox.run(&request, cancel).await {
            Ok(report) => report,
            Err(e) => {
                // shell could not even be spawned; report it like a crash
                tracing::error!("sandbox failure: {}", e);
                SandboxReport {
                    stderr: e.to_string(),
                    simulated: true,
                    ..SandboxReport::default()
                }
            }
        };
        if report.cancelled || cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        Ok(report)
    }

    /// Fresh validator over the observation file
    fn evaluate(&self, scratch: &SessionScratch) -> Result<Verdict, String> {
        let values = match scratch.read_observations() {
            Ok(values) => values,
            Err(ObservationError::Missing) => return Err("observation artifact vanished".into()),
            Err(ObservationError::Malformed(e)) => {
                return Err(format!("malformed observation artifact: {e}"))
            }
        };
        let trials = Trial::from_observations(&values).map_err(|e| e.to_string())?;
        let min = self.config.pipeline.min_trials;
        if trials.len() < min {
            return Err(format!("insufficient trials: {} < {min}", trials.len()));
        }
        let mut validator = SequentialValidator::new(self.config.sprt);
        Ok(validator.evaluate(&trials))
    }

    fn resolve(&self, target: &Path) -> Result<(PathBuf, PathBuf), ForgeError> {
        let joined = if target.is_absolute() {
            canonical_parent(target)
        } else {
            self.root.join(target)
        };
        let inside = joined
            .strip_prefix(&self.root)
            .map_err(|_| ForgeError::OutsideRoot(target.to_path_buf()))?;
        let mut relative = PathBuf::new();
        for component in inside.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => return Err(ForgeError::OutsideRoot(target.to_path_buf())),
            }
        }
        match relative.components().next() {
            None => return Err(ForgeError::OutsideRoot(target.to_path_buf())),
            Some(first) if matches!(first.as_os_str().to_str(), Some(".forge" | ".git")) => {
                return Err(ForgeError::Config(format!(
                    "{} is a protected path",
                    relative.display()
                )))
            }
            Some(_) => {}
        }
        let absolute = self.root.join(&relative);
        if absolute.is_dir() {
            return Err(ForgeError::Config(format!(
                "{} is a directory",
                relative.display()
            )));
        }
        Ok((relative, absolute))
    }

    async fn prepare_target(&self, absolute: &Path, create: bool) -> Result<(), ForgeError> {
        if !create {
            return Ok(());
        }
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ForgeError::io(parent, e))?;
        }
        tokio::fs::write(absolute, b"")
            .await
            .map_err(|e| ForgeError::io(absolute, e))?;
        tracing::info!(path = %absolute.display(), "created empty target");
        Ok(())
    }

    /// Record the final content; returns whether the file stays editable
    async fn record_edit(&self, run: &Run<'_>) -> bool {
        let content = match tokio::fs::read(&run.absolute).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %run.absolute.display(), "edit not recorded: {}", e);
                return true;
            }
        };
        let path = run.relative.clone();
        match self
            .guarded(move |guard| guard.record_edit(&path, &content))
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                run.note("file is now locked by the stability guard");
                false
            }
            Err(e) => {
                tracing::warn!("edit not recorded: {}", e);
                true
            }
        }
    }

    /// Run a guard operation on the blocking pool
    async fn guarded<T, F>(&self, op: F) -> Result<T, ForgeError>
    where
        T: Send + 'static,
        F: FnOnce(&StabilityGuard) -> Result<T, GuardError> + Send + 'static,
    {
        let guard = self.guard.clone();
        tokio::task::spawn_blocking(move || op(&guard))
            .await
            .map_err(|e| ForgeError::Join(e.to_string()))?
            .map_err(ForgeError::from)
    }
}

/// Mutable state of one pipeline run
struct Run<'a> {
    task: &'a MutationTask,
    events: &'a EventSink,
    relative: PathBuf,
    absolute: PathBuf,
    phase: Phase,
    attempt: u32,
    prior_error: Option<String>,
    prior_code: Option<String>,
    touched: bool,
}

impl Run<'_> {
    fn enter(&mut self, phase: Phase, message: impl Into<String>) -> Result<(), ForgeError> {
        validate_transition(self.phase, phase)?;
        self.phase = phase;
        self.events.progress(self.attempt, phase, message);
        Ok(())
    }

    fn note(&self, message: impl Into<String>) {
        self.events.progress(self.attempt, self.phase, message);
    }

    /// Move to `Aborted` unless already terminal, passing `error` through
    fn abort(&mut self, error: ForgeError) -> ForgeError {
        if !self.phase.is_terminal() {
            self.phase = Phase::Aborted;
            self.events.progress(self.attempt, Phase::Aborted, error.to_string());
        }
        error
    }
}

/// Releases the lease, on drop if not released explicitly
struct LeaseRelease {
    guard: StabilityGuard,
    path: PathBuf,
    holder: String,
    armed: bool,
}

impl LeaseRelease {
    async fn release(mut self) {
        self.armed = false;
        let guard = self.guard.clone();
        let path = std::mem::take(&mut self.path);
        let holder = std::mem::take(&mut self.holder);
        match tokio::task::spawn_blocking(move || guard.release(&path, &holder)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("lease not released: {}", e),
            Err(e) => tracing::warn!("lease not released: {}", e),
        }
    }
}

impl Drop for LeaseRelease {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.guard.release(&self.path, &self.holder) {
                tracing::warn!(path = %self.path.display(), "lease not released: {}", e);
            }
        }
    }
}

enum Generated {
    Code(String),
    Failed(String),
}

enum Round {
    Observed { logs: String, simulated: bool },
    Strike(String),
}

enum Verification {
    Observed { logs: String, simulated: bool },
    StruckOut(String),
}

enum Decided {
    Accept { verdict: Verdict, simulated: bool },
    /// `logic` is false for verification infrastructure failures
    Reject { reason: String, logic: bool },
}

enum AttemptOutcome {
    Accepted {
        session: SessionId,
        verdict: Verdict,
        simulated: bool,
    },
    Failed {
        session: SessionId,
        reason: String,
        rejected_code: Option<String>,
    },
}

/// Canonicalize the parent so absolute targets compare against the canonical root
fn canonical_parent(target: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(target) {
        return canonical;
    }
    match (target.parent(), target.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| target.to_path_buf()),
        _ => target.to_path_buf(),
    }
}
