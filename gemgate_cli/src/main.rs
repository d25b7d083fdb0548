use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use gemgate_core::{
    AnalysisScope, AnalysisType, CodeSource, Config, ExecutionStatus, FailureKind, Invoker,
};

const USAGE: &str = "\
gemgate - sanitized gateway to Gemini (API first, local CLI fallback)

USAGE:
    gemgate query <question> [context]
    gemgate analyze <file> [security|performance|architecture|comprehensive]
    gemgate codebase <directory> [security|performance|architecture|structure|all]

Answers go to stdout; progress and diagnostics go to stderr.
";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{}", USAGE);
        return Ok(ExitCode::from(2));
    };

    if matches!(command.as_str(), "help" | "--help" | "-h") {
        print!("{}", USAGE);
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load().await?;
    let invoker = Invoker::new(config)?;

    // Heartbeats land on stderr so piped stdout stays clean.
    let (tx, mut rx) = mpsc::channel::<gemgate_core::ProgressEvent>(16);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("still working... ({}s elapsed)", event.elapsed_seconds);
        }
    });

    let result = match command.as_str() {
        "query" => {
            let question = args.get(1).context("query requires a question")?;
            invoker
                .quick_query(question, args.get(2).map(|s| s.as_str()), Some(&tx))
                .await?
        }
        "analyze" => {
            let file = args.get(1).context("analyze requires a file path")?;
            let analysis_type = match args.get(2) {
                Some(raw) => raw
                    .parse::<AnalysisType>()
                    .map_err(anyhow::Error::msg)?,
                None => AnalysisType::default(),
            };
            invoker
                .analyze_code(CodeSource::File(file.clone()), analysis_type, Some(&tx))
                .await?
        }
        "codebase" => {
            let directory = args.get(1).context("codebase requires a directory path")?;
            let scope = match args.get(2) {
                Some(raw) => raw
                    .parse::<AnalysisScope>()
                    .map_err(anyhow::Error::msg)?,
                None => AnalysisScope::default(),
            };
            invoker
                .codebase_analysis(directory, scope, Some(&tx))
                .await?
        }
        other => {
            eprintln!("unknown command `{}`\n", other);
            eprint!("{}", USAGE);
            return Ok(ExitCode::from(2));
        }
    };

    drop(tx);
    let _ = printer.await;

    match result.status {
        ExecutionStatus::Success => {
            println!("{}", result.output.trim_end());
            Ok(ExitCode::SUCCESS)
        }
        ExecutionStatus::Error => {
            let label = match result.error_kind {
                Some(FailureKind::Timeout) => "timed out",
                _ => "failed",
            };
            eprintln!("Invocation {}: {}", label, result.output.trim_end());
            Ok(ExitCode::FAILURE)
        }
    }
}
