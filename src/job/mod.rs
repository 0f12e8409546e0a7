//! Job state machine
use log::{error, info};

use serde::{Deserialize, Serialize};

use tokio::sync::watch::Sender as WatchTx;

use uuid::Uuid;

use crate::error::JobError;

pub mod pipeline;
pub mod pool;

/// Job [Stage]s. Fallback stages are only entered when the
/// deterministic stage they follow failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Queued,
    Converting,
    ConvertingFallback,
    Extracting,
    ExtractingFallback,
    Succeeded,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Converting => write!(f, "CONVERTING"),
            Self::ConvertingFallback => write!(f, "CONVERTING_FALLBACK"),
            Self::Extracting => write!(f, "EXTRACTING"),
            Self::ExtractingFallback => write!(f, "EXTRACTING_FALLBACK"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl Stage {
    /// True once no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Converting)
                | (Self::Converting, Self::ConvertingFallback)
                | (Self::Converting, Self::Extracting)
                | (Self::Converting, Self::Failed)
                | (Self::ConvertingFallback, Self::Extracting)
                | (Self::ConvertingFallback, Self::Failed)
                | (Self::Extracting, Self::ExtractingFallback)
                | (Self::Extracting, Self::Succeeded)
                | (Self::Extracting, Self::Failed)
                | (Self::ExtractingFallback, Self::Succeeded)
                | (Self::ExtractingFallback, Self::Failed)
        )
    }

    /// Coarse [State] reported to pollers
    pub fn state(&self) -> State {
        match self {
            Self::Queued => State::Queued,
            Self::Succeeded => State::Succeeded,
            Self::Failed => State::Failed,
            _ => State::Running,
        }
    }
}

/// Polled job state
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Terminal result, as reported to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: ResultStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Job status snapshot, as polled by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: State,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl JobStatus {
    pub fn queued() -> Self {
        Self {
            state: State::Queued,
            output: Default::default(),
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Succeeded | State::Failed)
    }
}

/// Terminal [JobRecord] outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Success, with the file name (not path) of the location artifact
    Success(String),

    /// Failure message
    Failure(String),
}

/// One unit of work. Owned by a single worker from acceptance
/// until a terminal [Stage] is reached.
#[derive(Debug)]
pub struct JobRecord {
    /// Unique identifier
    id: Uuid,

    /// Declared input file name
    filename: String,

    /// Current [Stage]
    stage: Stage,

    /// Append-only progress log
    log: Vec<String>,

    /// Terminal [Outcome]
    outcome: Option<Outcome>,

    /// Snapshot publisher
    publisher: Option<WatchTx<JobStatus>>,
}

impl JobRecord {
    /// Creates a new [Stage::Queued] [JobRecord]
    pub fn new(filename: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            stage: Stage::Queued,
            log: Vec::new(),
            outcome: None,
            publisher: None,
        }
    }

    /// Publish [JobStatus] snapshots on this channel after each mutation
    pub fn with_publisher(mut self, publisher: WatchTx<JobStatus>) -> Self {
        publisher.send_replace(self.status());
        self.publisher = Some(publisher);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Appends one progress message
    pub fn progress(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{} - {}", self.id, message);
        self.log.push(message);
        self.publish();
    }

    /// Moves to the `next` [Stage], logging `message` first.
    pub fn transition(&mut self, next: Stage, message: impl Into<String>) -> Result<(), JobError> {
        if !self.stage.can_transition_to(next) {
            error!("{} - illegal transition {} -> {}", self.id, self.stage, next);
            return Err(JobError::IllegalTransition {
                from: self.stage,
                to: next,
            });
        }

        let message = message.into();
        info!("{} - {}", self.id, message);
        self.log.push(message);
        self.stage = next;
        self.publish();
        Ok(())
    }

    /// Terminal success
    pub fn succeed(&mut self, result_file: &str) -> Result<(), JobError> {
        self.outcome = Some(Outcome::Success(result_file.to_string()));
        let ret = self.transition(
            Stage::Succeeded,
            format!("Location records written to {}", result_file),
        );
        if ret.is_err() {
            self.outcome = None;
        }
        ret
    }

    /// Terminal failure
    pub fn fail(&mut self, message: &str) -> Result<(), JobError> {
        self.outcome = Some(Outcome::Failure(message.to_string()));
        let ret = self.transition(Stage::Failed, format!("Job failed: {}", message));
        if ret.is_err() {
            self.outcome = None;
        }
        ret
    }

    /// Current [JobStatus] snapshot
    pub fn status(&self) -> JobStatus {
        let result = self.outcome.as_ref().map(|outcome| match outcome {
            Outcome::Success(file) => JobResult {
                status: ResultStatus::Success,
                result_file: Some(file.clone()),
                message: None,
            },
            Outcome::Failure(message) => JobResult {
                status: ResultStatus::Error,
                result_file: None,
                message: Some(message.clone()),
            },
        });

        JobStatus {
            state: self.stage.state(),
            output: self.log.clone(),
            result,
        }
    }

    fn publish(&self) {
        if let Some(publisher) = &self.publisher {
            publisher.send_replace(self.status());
        }
    }
}
