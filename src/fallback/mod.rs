//! Fallback orchestrator: generated transformation procedures,
//! executed in the [sandbox] and validated against the
//! [FieldContract] of the stage that failed.
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use log::{debug, warn};

use crate::{
    converter::{ConversionAttempt, discard},
    error::{FallbackError, GenerationError},
    input::Encoding,
    record::{Accepted, FieldContract, contract::valid_fraction},
    settings::FallbackSettings,
};

pub mod client;
pub mod prompt;
pub mod sample;
pub mod sandbox;

use client::{ChatMessage, CodeGenerator};
use prompt::Task;
use sample::Sample;
use sandbox::Procedure;

/// One recovery request
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub task: Task,
    pub contract: FieldContract,
    pub sample: Sample,

    /// Input artifact, read by the generated procedure
    pub input: &'a Path,

    /// Input artifact compression
    pub gzip: bool,

    /// Output artifact, written by the generated procedure
    pub output: &'a Path,
}

/// Successful recovery
#[derive(Debug, Clone)]
pub struct Recovery {
    /// Validated output artifact
    pub artifact: PathBuf,

    /// Number of attempts it took
    pub attempts: usize,

    /// Accepted records
    pub accepted: Accepted,

    /// Summary of the successful attempt
    pub attempt: ConversionAttempt,
}

/// Outcome of a single attempt
enum Attempt {
    Accepted(Accepted, usize),
    Rejected {
        error: FallbackError,
        reply: Option<String>,
        trace: Vec<String>,
    },
}

pub struct Orchestrator {
    generator: Arc<dyn CodeGenerator>,
    settings: FallbackSettings,
    encodings: Vec<Encoding>,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        settings: FallbackSettings,
        encodings: Vec<Encoding>,
    ) -> Self {
        Self {
            generator,
            settings,
            encodings,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.settings.max_attempts
    }

    /// Single generate, execute and validate attempt
    fn attempt(&self, request: &Request<'_>, conversation: &[ChatMessage]) -> Attempt {
        let reply = match self.generator.generate(conversation) {
            Ok(reply) => reply,
            Err(e) => {
                return Attempt::Rejected {
                    error: e.into(),
                    reply: None,
                    trace: Vec::new(),
                };
            },
        };

        let Some(program) = prompt::extract_program(&reply) else {
            return Attempt::Rejected {
                error: FallbackError::ValidationFailed(
                    "no program found in reply, please fence your answer".to_string(),
                ),
                reply: Some(reply),
                trace: Vec::new(),
            };
        };

        let execution = Procedure::from_str(program).and_then(|procedure| {
            procedure.run(request.input, request.gzip, &self.encodings, request.output)
        });

        let execution = match execution {
            Ok(execution) => execution,
            Err(e) => {
                return Attempt::Rejected {
                    error: e.into(),
                    reply: Some(reply),
                    trace: Vec::new(),
                };
            },
        };

        let total = execution.records.len();

        match request.contract.validate(&execution.records) {
            Ok(accepted) => Attempt::Accepted(accepted, total),
            Err(e) => Attempt::Rejected {
                error: FallbackError::ValidationFailed(e),
                reply: Some(reply),
                trace: execution.trace,
            },
        }
    }

    /// Recovers a failed stage. Every failed attempt is reported through
    /// `progress`, exactly once. The output artifact only exists on success.
    pub fn recover(
        &self,
        request: &Request<'_>,
        progress: &mut dyn FnMut(String),
    ) -> Result<Recovery, FallbackError> {
        let max_attempts = self.settings.max_attempts.max(1);

        let mut conversation = vec![
            ChatMessage::system(prompt::system(&request.task)),
            ChatMessage::user(prompt::request(
                &request.task,
                &request.contract,
                &request.sample,
                request.input,
                request.output,
            )),
        ];

        let mut last = None;

        for ordinal in 1..=max_attempts {
            debug!(
                "{} - {} attempt {}/{}",
                request.input.display(),
                request.task,
                ordinal,
                max_attempts
            );

            match self.attempt(request, &conversation) {
                Attempt::Accepted(accepted, total) => {
                    if let Err(e) = accepted.write(request.output) {
                        discard(request.output);
                        return Err(FallbackError::ExecutionFailed(e.into()));
                    }

                    let attempt = ConversionAttempt {
                        ordinal,
                        source: format!("generated#{}", ordinal),
                        record_count: total,
                        valid_fraction: valid_fraction(accepted.valid(), total),
                    };

                    return Ok(Recovery {
                        artifact: request.output.to_path_buf(),
                        attempts: ordinal,
                        accepted,
                        attempt,
                    });
                },
                Attempt::Rejected {
                    error,
                    reply,
                    trace,
                } => {
                    discard(request.output);

                    progress(format!(
                        "Fallback attempt {}/{} failed: {}",
                        ordinal, max_attempts, error
                    ));

                    match &error {
                        FallbackError::GenerationFailed(e) if e.is_permanent() => {
                            return Err(FallbackError::CapabilityUnavailable(e.to_string()));
                        },
                        FallbackError::GenerationFailed(GenerationError::RateLimited) => {
                            if ordinal < max_attempts {
                                warn!(
                                    "{} - rate limited, backing off for {:?}",
                                    request.input.display(),
                                    self.settings.backoff
                                );
                                std::thread::sleep(self.settings.backoff);
                            }
                        },
                        _ => {},
                    }

                    if let Some(reply) = reply {
                        conversation.push(ChatMessage::assistant(reply));
                        conversation.push(ChatMessage::user(prompt::feedback(
                            &error.to_string(),
                            &trace,
                        )));
                    }

                    last = Some(error);
                },
            }
        }

        Err(FallbackError::MaxAttemptsExceeded {
            attempts: max_attempts,
            last: Box::new(last.unwrap_or_else(|| {
                FallbackError::ValidationFailed("no attempt was made".to_string())
            })),
        })
    }
}
