//! Converter then extractor, each backed by the fallback orchestrator
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, error, warn};

use crate::{
    converter::Converter,
    error::{ConversionError, JobError},
    extractor::{Extractor, read_canonical},
    fallback::{
        Orchestrator, Request, client::CodeGenerator, prompt::Task, sample::Sample,
    },
    input::{Encoding, RawInput, read_text},
    job::{JobRecord, Stage},
    record::{Accepted, Bounds, CanonicalRecord, FieldContract},
    settings::{FallbackSettings, PipelineSettings, Settings},
};

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Best effort removal
fn remove(job: &JobRecord, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(_) => debug!("{} - removed {}", job.id(), path.display()),
        Err(e) => warn!("{} - failed to remove {}: {}", job.id(), path.display(), e),
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    fallback: FallbackSettings,
    threshold: f64,
    bounds: Bounds,
    encodings: Vec<Encoding>,
    converter: Converter,
    extractor: Extractor,
    orchestrator: Orchestrator,
}

impl Pipeline {
    pub fn new(settings: &Settings, generator: Arc<dyn CodeGenerator>) -> Self {
        Self {
            settings: settings.pipeline.clone(),
            fallback: settings.fallback.clone(),
            threshold: settings.converter.threshold,
            bounds: settings.bounds.clone(),
            encodings: settings.converter.encodings.clone(),
            converter: Converter::new(settings.converter.clone()),
            extractor: Extractor::new(settings.bounds.clone()),
            orchestrator: Orchestrator::new(
                generator,
                settings.fallback.clone(),
                settings.converter.encodings.clone(),
            ),
        }
    }

    /// Artifacts directory, next to the input when undefined
    pub fn prefix(&self) -> Option<&Path> {
        self.settings.prefix.as_deref()
    }

    /// Canonical conversion stage
    fn convert(
        &self,
        job: &mut JobRecord,
        input: &RawInput,
        canonical: &Path,
    ) -> Result<Vec<CanonicalRecord>, JobError> {
        let e = match self.converter.convert(input, canonical) {
            Ok(conversion) => {
                job.progress(format!("Canonical conversion succeeded, {}", conversion.attempt));
                return Ok(conversion.records);
            },
            Err(ConversionError::Io(e)) => {
                return Err(ConversionError::Io(e).into());
            },
            Err(e) => e,
        };

        job.transition(
            Stage::ConvertingFallback,
            format!(
                "Deterministic conversion failed ({}), requesting a generated converter",
                e
            ),
        )?;

        let text = input
            .text(&self.encodings)
            .map_err(|e| JobError::Conversion(e.into()))?;

        let request = Request {
            task: Task::Canonical {
                format: input.format(),
            },
            contract: FieldContract::Canonical {
                threshold: self.threshold,
            },
            sample: Sample::from_text(&text, &self.fallback),
            input: input.path(),
            gzip: input.is_gzip(),
            output: canonical,
        };

        let recovery = self
            .orchestrator
            .recover(&request, &mut |message| job.progress(message))
            .map_err(|source| JobError::Fallback {
                stage: Stage::ConvertingFallback,
                source,
            })?;

        job.progress(format!(
            "Generated conversion succeeded after {} attempt(s), {}",
            recovery.attempts, recovery.attempt
        ));

        match recovery.accepted {
            Accepted::Canonical(records) => Ok(records),
            Accepted::Location(_) => Ok(read_canonical(canonical)?),
        }
    }

    /// Location extraction stage
    fn extract(
        &self,
        job: &mut JobRecord,
        records: &[CanonicalRecord],
        canonical: &Path,
        location: &Path,
    ) -> Result<(), JobError> {
        let e = match self.extractor.extract(records, location) {
            Ok(locations) => {
                job.progress(format!("Extracted {} location records", locations.len()));
                return Ok(());
            },
            Err(e) => e,
        };

        job.transition(
            Stage::ExtractingFallback,
            format!(
                "Deterministic extraction failed ({}), requesting a generated extractor",
                e
            ),
        )?;

        let text = read_text(canonical, false, &self.encodings)
            .map_err(|e| JobError::Extraction(e.into()))?;

        let request = Request {
            task: Task::Location,
            contract: FieldContract::Location {
                bounds: self.bounds.clone(),
            },
            sample: Sample::from_text(&text, &self.fallback),
            input: canonical,
            gzip: false,
            output: location,
        };

        let recovery = self
            .orchestrator
            .recover(&request, &mut |message| job.progress(message))
            .map_err(|source| JobError::Fallback {
                stage: Stage::ExtractingFallback,
                source,
            })?;

        job.progress(format!(
            "Generated extraction succeeded after {} attempt(s), {} location records",
            recovery.attempts,
            recovery.accepted.len()
        ));

        Ok(())
    }

    /// Runs both stages, returns the location artifact.
    /// The [JobRecord] is left in its last non terminal [Stage].
    pub fn run(&self, job: &mut JobRecord, input: &RawInput) -> Result<PathBuf, JobError> {
        let prefix = self.settings.prefix.as_deref();
        let canonical = input.canonical_artifact(prefix);
        let location = input.location_artifact(prefix);

        job.transition(
            Stage::Converting,
            format!("Converting {} ({} format)", job.filename(), input.format()),
        )?;

        let records = self.convert(job, input, &canonical)?;

        job.transition(
            Stage::Extracting,
            format!("Extracting location records from {}", file_name(&canonical)),
        )?;

        self.extract(job, &records, &canonical, &location)?;

        Ok(location)
    }

    /// Runs a job to completion: terminal [Stage], then cleanup on success.
    pub fn process(&self, job: &mut JobRecord, input: &RawInput) -> Result<PathBuf, JobError> {
        match self.run(job, input) {
            Ok(location) => {
                self.cleanup(job, input, &location);
                job.succeed(&file_name(&location))?;
                Ok(location)
            },
            Err(e) => {
                error!("{} - {}", job.id(), e);
                if let Err(e) = job.fail(&e.to_string()) {
                    error!("{} - {}", job.id(), e);
                }
                Err(e)
            },
        }
    }

    /// Removes intermediate artifacts. Never affects the outcome.
    fn cleanup(&self, job: &JobRecord, input: &RawInput, location: &Path) {
        let canonical = input.canonical_artifact(self.settings.prefix.as_deref());

        if self.settings.remove_canonical && canonical != location && canonical.exists() {
            remove(job, &canonical);
        }

        if self.settings.remove_input && input.path() != location && input.path() != canonical {
            remove(job, input.path());
        }
    }
}
