use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command, value_parser};

use std::{path::PathBuf, str::FromStr};

use gnss2jsonl::{
    input::{Encoding, FormatKind},
    settings::Settings,
};

pub struct Cli {
    /// Arguments passed by user
    matches: ArgMatches,
}

impl Cli {
    /// Build new command line interface
    pub fn new() -> Self {
        Self {
            matches: {
                Command::new("gnss2jsonl")
                    .version(env!("CARGO_PKG_VERSION"))
                    .about("GNSS receiver files (RINEX, NMEA, other) to location records (JSONL)")
                    .color(ColorChoice::Always)
                    .arg_required_else_help(true)
                    .next_help_heading("Inputs")
                    .arg(
                        Arg::new("file")
                            .long("file")
                            .short('f')
                            .value_name("FILENAME")
                            .action(ArgAction::Append)
                            .required(true)
                            .value_parser(value_parser!(PathBuf))
                            .help("Load a single file. Use as many as needed, each file is one job.
Format is inferred from the file name: .obs, .rnx, .YYo (RINEX), .nmea (NMEA). Gzip files must be terminated with '.gz'")
                    )
                    .arg(
                        Arg::new("format")
                            .long("format")
                            .value_name("KIND")
                            .action(ArgAction::Set)
                            .value_parser(FormatKind::from_str)
                            .help("Overrides format inference, for all inputs: rinex, nmea or unknown")
                    )
                    .arg(
                        Arg::new("encoding")
                            .long("encoding")
                            .value_name("ENCODING")
                            .action(ArgAction::Append)
                            .value_parser(Encoding::from_str)
                            .help("Text encodings attempted in order: utf-8, ascii, latin1. Default is utf-8 then ascii.
Invalid sequences are dropped when none of them succeeds.")
                    )
                    .next_help_heading("Outputs")
                    .arg(
                        Arg::new("prefix")
                            .long("prefix")
                            .value_name("DIRECTORY")
                            .action(ArgAction::Set)
                            .value_parser(value_parser!(PathBuf))
                            .help("Custom directory for output products. Products are stored next to their input by default.")
                    )
                    .arg(
                        Arg::new("remove-input")
                            .long("remove-input")
                            .action(ArgAction::SetTrue)
                            .help("Remove input files once successfully processed")
                    )
                    .arg(
                        Arg::new("keep-canonical")
                            .long("keep-canonical")
                            .action(ArgAction::SetTrue)
                            .help("Preserve intermediate canonical (.jsonl) artifacts")
                    )
                    .next_help_heading("Processing")
                    .arg(
                        Arg::new("workers")
                            .short('j')
                            .long("workers")
                            .value_name("N")
                            .action(ArgAction::Set)
                            .value_parser(value_parser!(usize))
                            .help("Number of jobs processed in parallel. Default is 2.")
                    )
                    .arg(
                        Arg::new("threshold")
                            .long("threshold")
                            .value_name("RATIO")
                            .action(ArgAction::Set)
                            .value_parser(value_parser!(f64))
                            .help("Minimal valid canonical records ratio, between 0 and 1. Default is 0.5.")
                    )
                    .next_help_heading("Code generation (fallback)")
                    .arg(
                        Arg::new("max-attempts")
                            .long("max-attempts")
                            .value_name("N")
                            .action(ArgAction::Set)
                            .value_parser(value_parser!(usize))
                            .help("Generation attempts before a job is abandoned. Default is 10.")
                    )
                    .arg(
                        Arg::new("endpoint")
                            .long("endpoint")
                            .value_name("URL")
                            .action(ArgAction::Set)
                            .help("Azure OpenAI endpoint. Defaults to $AZURE_OPENAI_ENDPOINT.
Fallback is disabled when no endpoint is defined.")
                    )
                    .arg(
                        Arg::new("api-key")
                            .long("api-key")
                            .value_name("KEY")
                            .action(ArgAction::Set)
                            .help("Azure OpenAI API key. Defaults to $AZURE_OPENAI_API_KEY.")
                    )
                    .arg(
                        Arg::new("model")
                            .long("model")
                            .value_name("DEPLOYMENT")
                            .action(ArgAction::Set)
                            .help("Deployment name. Defaults to $AZURE_OPENAI_ENGINE, or gpt-4o.")
                    )
                    .arg(
                        Arg::new("api-version")
                            .long("api-version")
                            .value_name("VERSION")
                            .action(ArgAction::Set)
                            .help("API version. Defaults to $AZURE_OPENAI_API_VERSION, or 2024-02-01.")
                    )
                    .get_matches()
            },
        }
    }

    /// Input file paths
    pub fn filepaths(&self) -> Vec<&PathBuf> {
        if let Some(fp) = self.matches.get_many::<PathBuf>("file") {
            fp.collect()
        } else {
            Vec::new()
        }
    }

    /// Declared format, if any
    pub fn format(&self) -> Option<FormatKind> {
        self.matches.get_one::<FormatKind>("format").copied()
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.matches.get_one::<usize>("workers").copied().unwrap_or(2)
    }

    /// [Settings] from the environment, then command line
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::from_env();

        if let Some(prefix) = self.matches.get_one::<PathBuf>("prefix") {
            settings.pipeline.prefix = Some(prefix.clone());
        }

        settings.pipeline.remove_input = self.matches.get_flag("remove-input");
        settings.pipeline.remove_canonical = !self.matches.get_flag("keep-canonical");

        if let Some(threshold) = self.matches.get_one::<f64>("threshold") {
            settings.converter.threshold = threshold.clamp(0.0, 1.0);
        }

        if let Some(encodings) = self.matches.get_many::<Encoding>("encoding") {
            settings.converter.encodings = encodings.copied().collect();
        }

        if let Some(max_attempts) = self.matches.get_one::<usize>("max-attempts") {
            settings.fallback.max_attempts = (*max_attempts).max(1);
        }

        if let Some(endpoint) = self.matches.get_one::<String>("endpoint") {
            settings.client.endpoint = Some(endpoint.clone());
        }

        if let Some(key) = self.matches.get_one::<String>("api-key") {
            settings.client.api_key = Some(key.clone());
        }

        if let Some(model) = self.matches.get_one::<String>("model") {
            settings.client.model = model.clone();
        }

        if let Some(version) = self.matches.get_one::<String>("api-version") {
            settings.client.api_version = version.clone();
        }

        settings
    }
}
