//! Prompt Kernel CLI
//!
//! Reads a prompt from stdin and writes the result to stdout. Logs go to
//! stderr.
//!
//! ## Commands
//!
//! - `parse`: print the segment tree as JSON
//! - `compile`: print the compiled prompt
//! - `expand`: expand `(a|b)` fragments in raw text
//! - `serialize`: print the editable syntax of the parsed tree
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PROMPT_KERNEL_SEED`, `PROMPT_KERNEL_EXPAND_WILDCARDS`,
//!   `PROMPT_KERNEL_MAX_WILDCARD_DEPTH` and the cache settings (see `KernelConfig`)
//! - `RUST_LOG`: Log level filter (default: warn)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: pretty)
//!
//! ## Usage
//!
//! ```bash
//! echo '{{masterpiece}}, (red|blue) hair' | PROMPT_KERNEL_EXPAND_WILDCARDS=1 cargo run --bin prompt_kernel_cli -- compile
//! ```

use std::io::{self, Read, Write};
use std::process::ExitCode;

use tracing::{debug, error};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prompt_kernel::{
    compiler::Compiler, content_fingerprint, expand_nested_wildcards, parse, serialize,
    KernelConfig, PROMPT_KERNEL_SCHEMA_VERSION,
};

/// Initialize the tracing subscriber with JSON or pretty format on stderr
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .init();
    }
}

const USAGE: &str = "usage: prompt_kernel_cli <parse|compile|expand|serialize> < prompt.txt";

fn run(command: &str, input: &str, config: &KernelConfig) -> Result<String, Box<dyn std::error::Error>> {
    let output = match command {
        "parse" => {
            let tree = parse(input);
            let doc = serde_json::json!({
                "schema_version": PROMPT_KERNEL_SCHEMA_VERSION,
                "content_fingerprint": content_fingerprint(&tree),
                "root": tree,
            });
            serde_json::to_string_pretty(&doc)?
        }
        "compile" => Compiler::new(config.compile)
            .with_max_wildcard_depth(config.max_wildcard_depth)
            .compile(&parse(input)),
        "expand" => expand_nested_wildcards(input, config.compile.seed, config.max_wildcard_depth),
        "serialize" => serialize(&parse(input)),
        other => return Err(format!("unknown command {other:?}\n{USAGE}").into()),
    };
    Ok(output)
}

fn main() -> ExitCode {
    init_tracing();

    let Some(command) = std::env::args().nth(1) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let config = match KernelConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    debug!(?config, command = %command, "configuration loaded");

    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        error!(error = %e, "failed to read stdin");
        return ExitCode::FAILURE;
    }
    // a trailing newline from `echo` is not part of the prompt
    let input = input.strip_suffix('\n').unwrap_or(input.as_str());

    match run(&command, input, &config) {
        Ok(output) => {
            let mut stdout = io::stdout().lock();
            if writeln!(stdout, "{output}").is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}
