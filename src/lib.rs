#![doc(
    html_logo_url = "https://raw.githubusercontent.com/nav-solutions/.github/master/logos/logo2.jpg"
)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

/*
 * GNSS2JSONL is part of the nav-solutions framework.
 * Authors: Guillaume W. Bres <guillaume.bressaix@gmail.com> et al,
 * (cf. https://github.com/nav-solutions/rinex/graphs/contributors)
 * This framework is shipped under Mozilla Public V2 license.
 */

extern crate gnss_rs as gnss;

pub mod converter;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod input;
pub mod job;
pub mod record;
pub mod settings;
pub mod utils;

pub mod prelude {
    pub use crate::{
        converter::{Conversion, ConversionAttempt, Converter},
        error::{
            ConversionError, ExtractionError, FallbackError, GenerationError, JobError,
            SandboxError,
        },
        extractor::{Extractor, read_canonical},
        fallback::{
            Orchestrator, Recovery, Request,
            client::{AzureOpenAiClient, ChatMessage, CodeGenerator, Disabled, Throttled},
            prompt::Task,
            sample::Sample,
        },
        input::{Encoding, FormatKind, RawInput},
        job::{
            JobRecord, JobResult, JobStatus, Outcome, Stage, State,
            pipeline::Pipeline,
            pool::{JobHandle, WorkerPool},
        },
        record::{Bounds, CanonicalRecord, FieldContract, LocationRecord, Scalar},
        settings::Settings,
    };
}
