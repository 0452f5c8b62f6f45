//! Warden CLI - author-side test harness for policy scripts
//!
//! Usage:
//!   warden validate <script.js> <kind>    Run the validation pipeline
//!   warden eval <script.js> <kind>        Evaluate against the sample context
//!
//! `<kind>` is one of: package-policy, project-status, pull-request-check.
//! Both commands print JSON; `validate` exits non-zero when validation
//! fails, `eval` exits non-zero when the script fails or returns a bad
//! shape.

use std::process::ExitCode;
use std::sync::Arc;

use warden::pipeline::samples;
use warden::validators::{validate_package_result, validate_status_result};
use warden::{
    EntryPointKind, ExecutionHarness, ExecutionLimits, JsBackend, StaticFetch, ValidationPipeline,
};

fn usage() -> ExitCode {
    eprintln!("usage: warden <validate|eval> <script.js> <kind>");
    eprintln!("kinds: package-policy, project-status, pull-request-check");
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        return usage();
    }

    let command = args[1].as_str();
    let source = match std::fs::read_to_string(&args[2]) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("warden: {}: {}", args[2], e);
            return ExitCode::FAILURE;
        }
    };
    let kind: EntryPointKind = match args[3].parse() {
        Ok(kind) => kind,
        Err(e) => {
            eprintln!("warden: {e}");
            return usage();
        }
    };

    let harness =
        ExecutionHarness::new(Arc::new(JsBackend::default()), ExecutionLimits::validation());

    match command {
        "validate" => {
            let result = ValidationPipeline::new(harness).validate(&source, kind).await;
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("warden: {e}");
                    return ExitCode::FAILURE;
                }
            }
            if result.all_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        "eval" => {
            let sample = samples::sample_context(kind);
            let raw = match harness
                .execute(&source, kind, &sample, Arc::new(StaticFetch::default()))
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("warden: execution failed: {e}");
                    return ExitCode::FAILURE;
                }
            };

            let typed = if kind.is_status_kind() {
                validate_status_result(&raw).map(|r| serde_json::to_value(r).ok())
            } else {
                validate_package_result(&raw).map(|r| serde_json::to_value(r).ok())
            };

            match typed {
                Ok(Some(value)) => {
                    match serde_json::to_string_pretty(&value) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("warden: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                    ExitCode::SUCCESS
                }
                Ok(None) => {
                    eprintln!("warden: could not serialize result");
                    ExitCode::FAILURE
                }
                Err(e) => {
                    eprintln!("warden: bad result shape: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        _ => usage(),
    }
}
