/*
 * GNSS2JSONL is part of the nav-solutions framework.
 * Authors: Guillaume W. Bres <guillaume.bressaix@gmail.com> et al,
 * (cf. https://github.com/nav-solutions/rinex/graphs/contributors)
 * This framework is shipped under Mozilla Public V2 license.
 */

use std::sync::Arc;

use env_logger::{Builder, Target};

use log::{error, info, warn};

use gnss2jsonl::{
    fallback::client::{AzureOpenAiClient, CodeGenerator, Disabled, Throttled},
    input::RawInput,
    job::{State, pipeline::Pipeline, pool::WorkerPool},
};

mod cli;

use crate::cli::Cli;

/// Pending submissions
const QUEUE_SIZE: usize = 128;

#[tokio::main]
pub async fn main() {
    let mut builder = Builder::from_default_env();

    // stdout is reserved to job reports
    builder
        .target(Target::Stderr)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    // cli
    let cli = Cli::new();
    let settings = cli.settings();

    let generator: Arc<dyn CodeGenerator> = match AzureOpenAiClient::new(&settings.client) {
        Some(client) => {
            info!(
                "code generation fallback deployed ({})",
                settings.client.model
            );
            Arc::new(Throttled::new(
                client,
                settings.fallback.max_concurrent_generations,
            ))
        },
        None => {
            warn!("no code generation endpoint: fallback disabled");
            Arc::new(Disabled)
        },
    };

    let pipeline = Pipeline::new(&settings, generator);
    let pool = WorkerPool::new(pipeline, cli.workers(), QUEUE_SIZE);

    let mut handles = Vec::new();

    for path in cli.filepaths() {
        let mut input = RawInput::new(path);

        if let Some(format) = cli.format() {
            input = input.with_format(format);
        }

        match pool.submit(input).await {
            Ok(handle) => handles.push(handle),
            Err(e) => error!("{} - {}", path.display(), e),
        }
    }

    let mut failures = 0;

    for mut handle in handles {
        let status = handle.wait().await;

        if status.state != State::Succeeded {
            failures += 1;
        }

        let report = serde_json::json!({
            "id": handle.id(),
            "filename": handle.filename(),
            "status": status,
        });

        match serde_json::to_string_pretty(&report) {
            Ok(report) => println!("{}", report),
            Err(e) => error!("{} - {}", handle.id(), e),
        }
    }

    pool.shutdown().await;

    if failures > 0 {
        error!("{} job(s) failed", failures);
        std::process::exit(1);
    }
}
