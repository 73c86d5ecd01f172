//! Transform command
//!
//! `--exec` names the program; arguments after `--` are passed to it.
//! The external program receives the current bytes on stdin and the step
//! list as JSON in `LINEAGE_STEPS`; whatever it writes to stdout becomes the
//! child version.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use clap::Args;
use lineage_core::errors::{ExError, ExErrorKind, ExResult};
use lineage_core::model::TransformationStep;
use lineage_core::ports::TransformationEngine;
use lineage_engine::{LineageConfig, VersioningService};

use super::CommandResult;

pub const STEPS_ENV: &str = "LINEAGE_STEPS";

#[derive(Debug, Args)]
pub struct TransformArgs {
    /// Version to transform
    pub version: String,

    /// JSON array of steps, e.g. '[{"type":"scale","parameters":{"method":"standard"}}]'
    #[arg(long)]
    pub steps: String,

    /// Operator recorded on the new version and edge
    #[arg(long = "by")]
    pub operator: String,

    /// Program run as the transformation engine
    #[arg(long = "exec")]
    pub program: String,

    /// Extra arguments for the program, after `--`
    #[arg(last = true)]
    pub program_args: Vec<String>,
}

/// Runs a child process per transformation
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> ExResult<Self> {
        let program = program.into();
        if program.trim().is_empty() {
            return Err(ExError::new(ExErrorKind::InvalidInput).with_message("No program given"));
        }
        Ok(Self { program, args })
    }

    fn failed(&self, message: impl Into<String>) -> ExError {
        ExError::new(ExErrorKind::TransformationFailed)
            .with_op("run_transformation")
            .with_entity_id(self.program.clone())
            .with_message(message)
    }
}

impl TransformationEngine for ProcessEngine {
    fn apply(&self, input: &[u8], steps: &[TransformationStep]) -> ExResult<Vec<u8>> {
        let steps_json = serde_json::to_string(steps)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(STEPS_ENV, steps_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.failed(format!("cannot start: {}", e)))?;

        let stdin = child.stdin.take();
        let (written, output) = std::thread::scope(|s| {
            // feed stdin while stdout drains, so large tables cannot deadlock
            let writer = s.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(input),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output.map_err(|e| self.failed(format!("wait failed: {}", e)))?;
        let written = written.map_err(|_| self.failed("stdin writer panicked"))?;

        if !output.status.success() {
            let message = match written {
                Ok(()) => format!("exited with {}", output.status),
                Err(e) => format!("exited with {} (stdin: {})", output.status, e),
            };
            return Err(self.failed(message));
        }
        if let Err(e) = written {
            // a program may stop reading once it has what it needs
            tracing::warn!(program = %self.program, error = %e, "input not fully written to transformation");
        }
        Ok(output.stdout)
    }
}

pub fn execute(args: TransformArgs, config: &LineageConfig) -> CommandResult {
    let steps = TransformationStep::parse_list(&args.steps)?;
    let engine = ProcessEngine::new(args.program, args.program_args)?;
    let service = VersioningService::open(config, Arc::new(engine))?;

    let receipt = service.apply_transformation(&args.version, steps, &args.operator)?;
    println!("{}", receipt.version_id);
    Ok(())
}
