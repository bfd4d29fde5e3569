#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use screening_harness::config::Settings;
use screening_harness::gateway::{ChatGateway, ProviderGateway, TracingUsageSink};
use screening_harness::logging::init_tracing;
use screening_harness::profiles::load_profiles;
use screening_harness::screening::{
    build_report, evaluate, evaluate_batch, evaluate_concurrent, evaluate_concurrent_stream,
    render_report_markdown, BatchEvaluationRequest, ConcurrentEvaluationRequest, ConcurrentPlan,
    EvaluateRequest, EvaluationResult, Profile, ReportOptions, Rubric, WriterEventSink,
};
use screening_harness::server;
use screening_harness::state::AppState;

#[derive(Parser)]
#[command(name = "screening", version, about = "Rubric screening harness CLI")]
struct Cli {
    /// TOML settings file
    #[arg(long, global = true, env = "SCREENING_CONFIG")]
    config: Option<PathBuf>,
    /// Log level or filter directive (overridden by RUST_LOG / SCREENING_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        profiles: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Load profiles and print them with their assigned ids
    Profiles {
        #[arg(long)]
        profiles: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Evaluate a request JSON file (LLM calls)
    Evaluate {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Mode::Evaluate)]
        mode: Mode,
        /// NDJSON events instead of one response (concurrent mode only)
        #[arg(long)]
        stream: bool,
    },
    /// Render a ranking report from a request + response JSON
    Report {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        response: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value = "md")]
        format: String,
        #[arg(long, default_value_t = 5)]
        top_n: usize,
        #[arg(long)]
        include_explanations: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Same shapes as `POST /api/evaluate`
    Evaluate,
    /// One batched call for all profiles
    Batch,
    /// Batched units through the dispatcher
    Concurrent,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_json)?;
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            listen,
            profiles,
            limit,
        } => {
            apply_profile_flags(&mut settings, profiles, limit);
            if let Some(listen) = listen {
                settings.listen_addr = listen;
            }
            let profiles = load_profiles(&settings.profiles_path, settings.profile_limit)?;
            tracing::info!(
                profiles = profiles.len(),
                path = %settings.profiles_path.display(),
                "profiles loaded"
            );
            let state = AppState::new(gateway()?, settings.evaluation_config(), profiles);
            server::listen(&settings.listen_addr, state).await?;
        }
        Commands::Profiles {
            profiles,
            limit,
            out,
        } => {
            apply_profile_flags(&mut settings, profiles, limit);
            let profiles = load_profiles(&settings.profiles_path, settings.profile_limit)?;
            write_output(out.as_deref(), &serde_json::to_string_pretty(&profiles)?)?;
        }
        Commands::Evaluate {
            request,
            out,
            mode,
            stream,
        } => {
            if stream && mode != Mode::Concurrent {
                return Err("--stream requires --mode concurrent".into());
            }
            let config = settings.evaluation_config();
            let gateway = gateway()?;

            match mode {
                Mode::Evaluate => {
                    let req = EvaluateRequest::from_value(read_json(&request)?)?;
                    let resp = evaluate(gateway, req, &config).await?;
                    write_output(out.as_deref(), &serde_json::to_string_pretty(&resp)?)?;
                }
                Mode::Batch => {
                    let req: BatchEvaluationRequest = read_json(&request)?;
                    let resp = evaluate_batch(gateway.as_ref(), req, &config).await?;
                    write_output(out.as_deref(), &serde_json::to_string_pretty(&resp)?)?;
                }
                Mode::Concurrent => {
                    let req: ConcurrentEvaluationRequest = read_json(&request)?;
                    let plan = ConcurrentPlan::new(req)?;
                    if stream {
                        let writer: Box<dyn Write + Send> = match &out {
                            Some(path) => Box::new(std::fs::File::create(path)?),
                            None => Box::new(io::stdout()),
                        };
                        let sink = WriterEventSink::new(writer);
                        evaluate_concurrent_stream(gateway, plan, &config, &sink, None).await?;
                        sink.into_inner()?.flush()?;
                    } else {
                        let evaluation =
                            evaluate_concurrent(gateway, plan, &config, None, None).await?;
                        let resp = evaluation.into_response();
                        write_output(out.as_deref(), &serde_json::to_string_pretty(&resp)?)?;
                    }
                }
            }
        }
        Commands::Report {
            request,
            response,
            out,
            format,
            top_n,
            include_explanations,
        } => {
            let (rubric, profiles) = request_inputs(read_json(&request)?)?;
            let results = response_results(read_json(&response)?)?;
            let opts = ReportOptions {
                top_n,
                include_explanations,
            };
            let report = build_report(&results, &[rubric], &profiles, &opts);
            let rendered = match format.as_str() {
                "md" | "markdown" => render_report_markdown(&report),
                "json" => serde_json::to_string_pretty(&report)?,
                other => return Err(format!("unknown report format '{other}'").into()),
            };
            write_output(out.as_deref(), &rendered)?;
        }
    }

    Ok(())
}

fn gateway() -> Result<Arc<dyn ChatGateway>, Box<dyn std::error::Error>> {
    Ok(Arc::new(ProviderGateway::from_env(Arc::new(TracingUsageSink))?))
}

fn apply_profile_flags(settings: &mut Settings, profiles: Option<PathBuf>, limit: Option<usize>) {
    if let Some(path) = profiles {
        settings.profiles_path = path;
    }
    if let Some(limit) = limit {
        settings.profile_limit = limit;
    }
}

/// Rubric plus profiles from any request shape.
fn request_inputs(value: Value) -> Result<(Rubric, Vec<Profile>), Box<dyn std::error::Error>> {
    let rubric: Rubric = serde_json::from_value(
        value
            .get("rubric")
            .cloned()
            .ok_or("request has no rubric")?,
    )?;
    let profiles: Vec<Profile> = match (value.get("profiles"), value.get("profile")) {
        (Some(list), _) => serde_json::from_value(list.clone())?,
        (None, Some(one)) => vec![serde_json::from_value(one.clone())?],
        (None, None) => return Err("request has no profiles".into()),
    };
    Ok((rubric, profiles))
}

/// Results from an aggregate response, or the single result of a
/// single-profile response.
fn response_results(value: Value) -> Result<Vec<EvaluationResult>, Box<dyn std::error::Error>> {
    match value.get("results") {
        Some(results) => Ok(serde_json::from_value(results.clone())?),
        None => Ok(vec![serde_json::from_value(value)?]),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_output(path: Option<&Path>, content: &str) -> Result<(), io::Error> {
    match path {
        Some(path) => std::fs::write(path, content),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(content.as_bytes())?;
            stdout.write_all(b"\n")
        }
    }
}
