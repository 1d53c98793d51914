use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ValidationOptions;
use crate::problems::{Aborted, Problem, ProblemSink};
use crate::progress::{NoOpProgressHandler, ProgressHandler};
use crate::schedule::{Schedule, ScheduleError, ValidationState};
use crate::stop_time_store::StoreError;

/// Which half of validation a pass belongs to. Structural passes look at one
/// entity and its children; cross-entity passes need the whole schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStage {
    Structural,
    CrossEntity,
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Aborted(#[from] Aborted),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schedule(ScheduleError),
}

impl From<ScheduleError> for PassError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Aborted(aborted) => PassError::Aborted(aborted),
            ScheduleError::Store(store) => PassError::Store(store),
            other => PassError::Schedule(other),
        }
    }
}

pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> PassStage {
        PassStage::CrossEntity
    }

    fn validate(
        &self,
        schedule: &Schedule,
        options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), PassError>;
}

/// Runs validation passes over a loaded schedule, structural passes first.
#[derive(Default)]
pub struct ValidatorRunner {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidatorRunner {
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    pub fn register<V>(&mut self, validator: V)
    where
        V: Validator + 'static,
    {
        self.validators.push(Box::new(validator));
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.validators.iter().map(|validator| validator.name())
    }

    pub fn run(
        &self,
        schedule: &mut Schedule,
        options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
    ) -> Result<(), Aborted> {
        self.run_with_progress(schedule, options, sink, &NoOpProgressHandler)
    }

    /// Every pass runs once. Problems go to `sink`; only the sink can stop
    /// the run early.
    pub fn run_with_progress(
        &self,
        schedule: &mut Schedule,
        options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
        progress: &dyn ProgressHandler,
    ) -> Result<(), Aborted> {
        progress.set_total_passes(self.validators.len());
        self.run_stage(PassStage::Structural, schedule, options, sink, progress)?;
        schedule.set_validation_state(ValidationState::StructurallyChecked);
        self.run_stage(PassStage::CrossEntity, schedule, options, sink, progress)?;
        schedule.set_validation_state(ValidationState::Validated);
        Ok(())
    }

    fn run_stage(
        &self,
        stage: PassStage,
        schedule: &Schedule,
        options: &ValidationOptions,
        sink: &mut dyn ProblemSink,
        progress: &dyn ProgressHandler,
    ) -> Result<(), Aborted> {
        for validator in self.validators.iter().filter(|validator| validator.stage() == stage) {
            let name = validator.name();
            progress.on_start_pass(name);
            debug!(pass = name, "running validation pass");
            let result = catch_unwind(AssertUnwindSafe(|| {
                validator.validate(schedule, options, &mut *sink)
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(PassError::Aborted(aborted))) => return Err(aborted),
                Ok(Err(PassError::Store(err))) => {
                    sink.report(pass_failure(name, &err.to_string()))?;
                }
                Ok(Err(PassError::Schedule(err))) => {
                    sink.report(pass_failure(name, &err.to_string()))?;
                }
                Err(panic) => {
                    let message = panic_payload_message(&*panic);
                    warn!(pass = name, %message, "validation pass panicked");
                    sink.report(pass_failure(name, &message))?;
                }
            }
            progress.on_finish_pass(name);
        }
        Ok(())
    }
}

fn pass_failure(validator: &str, message: &str) -> Problem {
    Problem::other(format!("Validation pass {validator} failed: {message}"))
        .with_context_field("validator", validator)
        .with_context_field("message", message)
}

pub(crate) fn panic_payload_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::{ProblemAccumulator, ProblemKind};
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        stage: PassStage,
        seen: &'static Mutex<Vec<&'static str>>,
    }

    impl Validator for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn stage(&self) -> PassStage {
            self.stage
        }

        fn validate(
            &self,
            _schedule: &Schedule,
            _options: &ValidationOptions,
            sink: &mut dyn ProblemSink,
        ) -> Result<(), PassError> {
            self.seen.lock().unwrap().push(self.name);
            sink.report(Problem::other(self.name).warning())?;
            Ok(())
        }
    }

    struct Panicking;

    impl Validator for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn validate(
            &self,
            _schedule: &Schedule,
            _options: &ValidationOptions,
            _sink: &mut dyn ProblemSink,
        ) -> Result<(), PassError> {
            panic!("boom");
        }
    }

    #[test]
    fn runs_structural_passes_first() {
        static SEEN: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let mut runner = ValidatorRunner::new();
        runner.register(Recording { name: "cross", stage: PassStage::CrossEntity, seen: &SEEN });
        runner.register(Recording { name: "structure", stage: PassStage::Structural, seen: &SEEN });

        let mut schedule = Schedule::new();
        let mut sink = ProblemAccumulator::new();
        runner.run(&mut schedule, &ValidationOptions::default(), &mut sink).unwrap();

        assert_eq!(*SEEN.lock().unwrap(), vec!["structure", "cross"]);
        assert_eq!(schedule.validation_state(), ValidationState::Validated);
        assert_eq!(sink.warning_count(), 2);
    }

    #[test]
    fn reports_panicking_pass_and_keeps_going() {
        static SEEN: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let mut runner = ValidatorRunner::new();
        runner.register(Panicking);
        runner.register(Recording { name: "after", stage: PassStage::CrossEntity, seen: &SEEN });

        let mut schedule = Schedule::new();
        let mut sink = ProblemAccumulator::new();
        runner.run(&mut schedule, &ValidationOptions::default(), &mut sink).unwrap();

        let failure = &sink.problems()[0];
        assert_eq!(failure.kind, ProblemKind::OtherProblem);
        assert!(failure.is_error());
        assert_eq!(failure.context_str("validator"), Some("panicking"));
        assert_eq!(failure.context_str("message"), Some("boom"));
        assert_eq!(*SEEN.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn strict_sink_stops_before_validated() {
        static SEEN: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let mut runner = ValidatorRunner::new();
        runner.register(Recording { name: "structure", stage: PassStage::Structural, seen: &SEEN });
        let mut schedule = Schedule::new();
        let mut sink = crate::problems::StrictSink::new(true);
        assert!(runner.run(&mut schedule, &ValidationOptions::default(), &mut sink).is_err());
        assert_eq!(schedule.validation_state(), ValidationState::Unvalidated);
    }
}
