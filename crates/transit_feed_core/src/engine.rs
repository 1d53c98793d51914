//! Load, validate and optionally re-write a feed in one call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{LoadOptions, ValidationOptions};
use crate::input::FeedInput;
use crate::loader::{FeedLoader, LoadStatus, LoadedFeed};
use crate::problems::{Problem, ProblemKind, ProblemSink};
use crate::progress::{NoOpProgressHandler, ProgressHandler};
use crate::rules::default_runner;
use crate::schedule::{Schedule, ValidationState};
use crate::stop_time_store::StoreError;
use crate::validator::{panic_payload_message, ValidatorRunner};
use crate::writer::{FeedWriter, WriteError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug)]
pub struct ValidationOutcome {
    pub schedule: Schedule,
    pub status: LoadStatus,
}

impl ValidationOutcome {
    /// Whether every validation pass ran to the end.
    pub fn is_validated(&self) -> bool {
        self.schedule.validation_state() == ValidationState::Validated
    }
}

pub struct FeedEngine {
    load_options: LoadOptions,
    validation_options: ValidationOptions,
    runner: ValidatorRunner,
    progress: Arc<dyn ProgressHandler>,
}

impl Default for FeedEngine {
    fn default() -> Self {
        Self::new(LoadOptions::default(), ValidationOptions::default())
    }
}

impl FeedEngine {
    /// An engine running the standard validation passes.
    pub fn new(load_options: LoadOptions, validation_options: ValidationOptions) -> Self {
        Self {
            load_options,
            validation_options,
            runner: default_runner(),
            progress: Arc::new(NoOpProgressHandler),
        }
    }

    pub fn with_runner(mut self, runner: ValidatorRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn validation_options(&self) -> &ValidationOptions {
        &self.validation_options
    }

    pub fn validate_path(
        &self,
        path: impl AsRef<Path>,
        sink: &mut dyn ProblemSink,
    ) -> Result<ValidationOutcome, StoreError> {
        let path = path.as_ref();
        match FeedInput::open(path) {
            Ok(input) => self.validate_input(input, sink),
            Err(err) => {
                let problem = err.to_problem(&path.display().to_string());
                let status = halted(problem, sink);
                warn!(feed = %path.display(), "feed could not be opened");
                Ok(ValidationOutcome {
                    schedule: Schedule::new(),
                    status,
                })
            }
        }
    }

    /// Loads `input` and, when the load completes, runs every validation
    /// pass. A panic while loading is reported as a fatal problem.
    pub fn validate_input(
        &self,
        input: FeedInput,
        sink: &mut dyn ProblemSink,
    ) -> Result<ValidationOutcome, StoreError> {
        let feed_name = input.display_name();
        let loader = FeedLoader::new(input)
            .with_options(self.load_options.clone())
            .with_progress(Arc::clone(&self.progress));
        let loaded = catch_unwind(AssertUnwindSafe(|| loader.load(&mut *sink)));
        let LoadedFeed {
            mut schedule,
            status,
        } = match loaded {
            Ok(result) => result?,
            Err(panic) => {
                let message = panic_payload_message(&*panic);
                warn!(feed = %feed_name, %message, "loader panicked");
                let problem = Problem::other(format!(
                    "Runtime panic while loading feed {feed_name}: {message}"
                ))
                .with_context_field("exception", "panic")
                .with_context_field("message", message);
                return Ok(ValidationOutcome {
                    schedule: Schedule::new(),
                    status: halted(problem, sink),
                });
            }
        };

        if status == LoadStatus::Complete {
            let validated = self.runner.run_with_progress(
                &mut schedule,
                &self.validation_options,
                sink,
                self.progress.as_ref(),
            );
            if let Err(aborted) = validated {
                warn!(kind = aborted.problem.kind.code(), "validation aborted");
            } else {
                info!(feed = %feed_name, "validation finished");
            }
        }
        Ok(ValidationOutcome { schedule, status })
    }

    /// Validates the feed at `input` and writes it to `output` when the load
    /// completed. Returns whether anything was written.
    pub fn validate_and_write(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        sink: &mut dyn ProblemSink,
    ) -> Result<(ValidationOutcome, bool), EngineError> {
        let outcome = self.validate_path(input, sink)?;
        if outcome.status != LoadStatus::Complete {
            return Ok((outcome, false));
        }
        FeedWriter::new(&outcome.schedule).write_to_path(output)?;
        Ok((outcome, true))
    }
}

/// Reports a problem that ended the load and maps it to a status.
fn halted(problem: Problem, sink: &mut dyn ProblemSink) -> LoadStatus {
    let kind: ProblemKind = problem.kind;
    match sink.report(problem) {
        Ok(()) => LoadStatus::Fatal(kind),
        Err(_) => LoadStatus::Aborted(kind),
    }
}
