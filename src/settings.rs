use std::{path::PathBuf, time::Duration};

use crate::input::Encoding;

pub use crate::record::location::Bounds;

/// Default validity threshold of the canonical conversion
pub const DEFAULT_VALIDITY_THRESHOLD: f64 = 0.5;

/// Default number of generation attempts
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Canonical conversion settings
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterSettings {
    /// Minimal valid fraction for a conversion to be accepted
    pub threshold: f64,

    /// Minimal number of digits of a trailing NMEA timestamp token
    pub min_timestamp_digits: usize,

    /// Text [Encoding]s, attempted in this order
    pub encodings: Vec<Encoding>,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_VALIDITY_THRESHOLD,
            min_timestamp_digits: 13,
            encodings: vec![Encoding::Utf8, Encoding::Ascii],
        }
    }
}

/// Fallback orchestration settings
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackSettings {
    /// Maximal number of generation attempts
    pub max_attempts: usize,

    /// Leading lines always present in the sample
    pub head_lines: usize,

    /// Sample size limit, in lines
    pub max_lines: usize,

    /// Sample size limit, in bytes
    pub max_bytes: usize,

    /// Pause after a rate limited request
    pub backoff: Duration,

    /// Maximal number of concurrent generation requests, process wide
    pub max_concurrent_generations: usize,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            head_lines: 15,
            max_lines: 25,
            max_bytes: 4096,
            backoff: Duration::from_secs(5),
            max_concurrent_generations: 2,
        }
    }
}

/// Code generation capability settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Service endpoint, generation is disabled when missing
    pub endpoint: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Deployment (model) name
    pub model: String,

    /// API version
    pub api_version: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Completion size limit
    pub max_tokens: u32,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "gpt-4o".to_string(),
            api_version: "2024-02-01".to_string(),
            temperature: 0.2,
            max_tokens: 2000,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Job pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Custom directory prefix for output products.
    /// Artifacts are stored next to their input when undefined.
    pub prefix: Option<PathBuf>,

    /// Remove the raw input on success
    pub remove_input: bool,

    /// Remove the canonical artifact on success
    pub remove_canonical: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prefix: None,
            remove_input: true,
            remove_canonical: true,
        }
    }
}

/// Process wide configuration, passed down explicitly
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub converter: ConverterSettings,
    pub bounds: Bounds,
    pub fallback: FallbackSettings,
    pub client: ClientSettings,
    pub pipeline: PipelineSettings,
}

impl Settings {
    /// Builds [Settings] from the environment, on top of defaults.
    /// Only the code generation capability is environment configurable.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(endpoint) = std::env::var("AZURE_OPENAI_ENDPOINT") {
            settings.client.endpoint = Some(endpoint);
        }
        if let Ok(key) = std::env::var("AZURE_OPENAI_API_KEY") {
            settings.client.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("AZURE_OPENAI_ENGINE") {
            settings.client.model = model;
        }
        if let Ok(version) = std::env::var("AZURE_OPENAI_API_VERSION") {
            settings.client.api_version = version;
        }

        settings
    }
}

#[cfg(test)]
mod test {
    use super::Settings;
    use crate::input::Encoding;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.converter.threshold, 0.5);
        assert_eq!(settings.converter.min_timestamp_digits, 13);
        assert_eq!(
            settings.converter.encodings,
            vec![Encoding::Utf8, Encoding::Ascii]
        );
        assert_eq!(settings.fallback.max_attempts, 10);
        assert_eq!(settings.fallback.max_lines, 25);
        assert_eq!(settings.bounds.altitude, (-1000.0, 9000.0));
        assert_eq!(settings.bounds.speed, (0.0, 278.0));
        assert!(settings.client.endpoint.is_none());
        assert!(settings.pipeline.remove_input);
        assert!(settings.pipeline.remove_canonical);
    }
}
