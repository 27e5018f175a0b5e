//! Expert-workflow interpreter CLI.
//!
//! Interprets a YAML workflow document (`ACTIONS` plus optional
//! `STRINGS`) against a configured expert command, with pre-run
//! validation and versioned output records per run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use conductor::config::{self, RunConfig};
use conductor::document::{self, WorkflowDocument};
use conductor::engine::Interpreter;
use conductor::error::EngineError;
use conductor::exit_codes;
use conductor::expand::{self, MacroLibrary};
use conductor::expert::CommandExpert;
use conductor::logging;
use conductor::observer::NoopObserver;
use conductor::outputs::OutputStore;
use conductor::strings::StringTable;
use conductor::validate::{self, ValidationReport};

const ARTIFACT_NAME: &str = "resolved_workflow.yaml";

#[derive(Parser)]
#[command(name = "conductor", version, about = "Declarative expert-workflow interpreter")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "conductor.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow, then execute it step by step.
    Run {
        /// Workflow YAML file.
        workflow: PathBuf,
        /// Text bound to STR_USER_INPUT for this run.
        #[arg(long)]
        input: Option<String>,
        /// External STRINGS file overriding the inline section.
        #[arg(long)]
        strings: Option<PathBuf>,
        /// Skip pre-run validation.
        #[arg(long)]
        no_validate: bool,
    },
    /// Validate a workflow and write the resolved artifact, without running it.
    Validate {
        /// Workflow YAML file.
        workflow: PathBuf,
        /// External STRINGS file overriding the inline section.
        #[arg(long)]
        strings: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            classify(&err)
        }
    };
    std::process::exit(code);
}

fn classify(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::LoopLimitExceeded { .. }) => exit_codes::LOOP_LIMIT,
        Some(
            EngineError::Load(_)
            | EngineError::Validation { .. }
            | EngineError::UnknownActionType { .. },
        ) => exit_codes::INVALID,
        Some(_) => exit_codes::RUN_FAILED,
        None => exit_codes::RUN_FAILED,
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cfg = config::load_config(&cli.config)?;
    match cli.command {
        Command::Run {
            workflow,
            input,
            strings,
            no_validate,
        } => cmd_run(&cfg, &workflow, input.as_deref(), strings.as_deref(), no_validate),
        Command::Validate { workflow, strings } => {
            cmd_validate(&cfg, &workflow, strings.as_deref())
        }
    }
}

fn load_expanded(
    cfg: &RunConfig,
    workflow: &Path,
    strings_file: Option<&Path>,
    input: Option<&str>,
) -> Result<(WorkflowDocument, StringTable)> {
    let doc = document::load_document(workflow)?;
    let library = MacroLibrary::new(&cfg.macros_dir);
    let expanded = expand::expand_document(&doc, &library);

    let table = match (strings_file, &expanded.strings) {
        (Some(path), _) => StringTable::from_file(path, input)?,
        (None, Some(value)) => StringTable::from_value(value, input)?,
        (None, None) => StringTable::empty(input),
    };
    Ok((expanded, table))
}

fn report_findings(report: &ValidationReport) {
    for error in &report.errors {
        eprintln!("error: {error}");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}

fn workflow_name(workflow: &Path) -> String {
    workflow
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string())
}

fn cmd_run(
    cfg: &RunConfig,
    workflow: &Path,
    input: Option<&str>,
    strings_file: Option<&Path>,
    no_validate: bool,
) -> Result<i32> {
    let (doc, strings) = load_expanded(cfg, workflow, strings_file, input)?;
    let mut outputs = OutputStore::create(Path::new(&cfg.outputs_dir), &workflow_name(workflow))?;

    if cfg.validate && !no_validate {
        let report = validate::validate_document(&doc, &strings);
        report_findings(&report);
        validate::write_artifact(&doc, &strings, &report, &outputs.dir().join(ARTIFACT_NAME))?;
        if !report.ok() {
            return Err(EngineError::Validation {
                count: report.errors.len(),
            }
            .into());
        }
    }

    let caller = CommandExpert::new(
        cfg.expert.command.clone(),
        Duration::from_secs(cfg.expert.call_timeout_secs),
        cfg.expert.response_limit_bytes,
    );
    let observer = NoopObserver;
    let interpreter = Interpreter::new(&doc, &strings, &caller, &observer);
    let outcome = interpreter.run(&mut outputs)?;

    println!(
        "run complete: {} step execution(s), outputs in {}",
        outcome.steps_executed,
        outputs.dir().display()
    );
    Ok(exit_codes::OK)
}

fn cmd_validate(cfg: &RunConfig, workflow: &Path, strings_file: Option<&Path>) -> Result<i32> {
    let (doc, strings) = load_expanded(cfg, workflow, strings_file, None)?;
    let report = validate::validate_document(&doc, &strings);
    report_findings(&report);

    let artifact = workflow.with_file_name(format!("{}_resolved.yaml", workflow_name(workflow)));
    validate::write_artifact(&doc, &strings, &report, &artifact)?;
    println!("resolved workflow written to {}", artifact.display());

    if report.ok() {
        println!("validation passed ({} warning(s))", report.warnings.len());
        Ok(exit_codes::OK)
    } else {
        Err(EngineError::Validation {
            count: report.errors.len(),
        }
        .into())
    }
}
