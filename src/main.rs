use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudmend::action::ActionRegistry;
use cloudmend::cloud::{format_api_error, Credentials, RestClient};
use cloudmend::config::Config;
use cloudmend::error::{FetchError, PolicyError};
use cloudmend::policy::{PolicyDocument, PolicyRunner, RunOptions, RunReport};
use cloudmend::report::{self, OutputFormat};
use cloudmend::resource::ResourceRegistry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Declarative compliance and remediation for cloud resources
#[derive(Parser, Debug)]
#[command(name = "cloudmend", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Project to use
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Region to use
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Send every service's calls to this endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Maximum concurrent action calls
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Log level for debugging (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the policies of a document
    Run {
        /// Policy document (YAML or JSON)
        file: PathBuf,

        /// Only run the named policy
        #[arg(long)]
        policy: Option<String>,

        /// Evaluate filters but skip every action
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "table")]
        output: OutputFormat,

        /// Also list the resources the filters excluded
        #[arg(long)]
        show_excluded: bool,
    },
    /// Check a document without calling any service
    Validate {
        /// Policy document (YAML or JSON)
        file: PathBuf,
    },
    /// List the resource types policies can target
    Resources,
    /// Save --project and --region as defaults
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let Some(log_path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudmend {} started with log level: {:?}", cloudmend::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::from(1);
        }
    };

    match dispatch(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(args: Args) -> Result<ExitCode> {
    let resources = ResourceRegistry::builtin()?;
    let config = Config::load();

    match &args.command {
        Command::Resources => {
            for key in resources.keys() {
                if let Some(def) = resources.get(key) {
                    println!(
                        "{:<8} {:<20} service={} id={} name={}",
                        key, def.display_name, def.service, def.id_field, def.name_field
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            let mut config = config;
            if let Some(project) = &args.project {
                config.set_project(project)?;
            }
            if let Some(region) = &args.region {
                config.set_region(region)?;
            }
            if let Some(path) = Config::config_path() {
                println!("{}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file } => {
            let doc = PolicyDocument::load(file)?;
            let actions = ActionRegistry::builtin();
            let max_depth = config.max_depth.unwrap_or(RunOptions::default().max_depth);
            let mut invalid = false;
            for policy in &doc.policies {
                let problems = policy.validate(&resources, &actions, max_depth);
                if problems.is_empty() {
                    println!("{}: ok", policy.name);
                } else {
                    invalid = true;
                    for problem in problems {
                        println!("{}: {}", policy.name, problem);
                    }
                }
            }
            Ok(if invalid { ExitCode::from(1) } else { ExitCode::SUCCESS })
        }
        Command::Run {
            file,
            policy,
            dry_run,
            output,
            show_excluded,
        } => {
            let doc = PolicyDocument::load(file)?;
            let selected: Vec<_> = match policy {
                Some(name) => match doc.get(name) {
                    Some(p) => vec![p],
                    None => bail!("No policy named '{}' in {:?}", name, file),
                },
                None => doc.policies.iter().collect(),
            };

            let Some(project) = config.effective_project(args.project.as_deref()) else {
                bail!("No project configured. Set HUAWEI_PROJECT_ID or use --project flag");
            };
            let region = config.effective_region(args.region.as_deref());
            tracing::info!("Using project: {}, region: {}", project, region);

            let mut client = RestClient::new(Credentials::from_env()?, &project, &region)?;
            for (service, endpoint) in &config.endpoints {
                client = client.with_endpoint(service, endpoint);
            }
            if let Some(endpoint) = &args.endpoint {
                client = client.with_default_endpoint(endpoint);
            }

            let defaults = RunOptions::default();
            let runner = PolicyRunner::new(Arc::new(client), resources, ActionRegistry::builtin())
                .with_options(RunOptions {
                    concurrency: args.concurrency.or(config.concurrency).unwrap_or(defaults.concurrency),
                    max_depth: config.max_depth.unwrap_or(defaults.max_depth),
                    dry_run: *dry_run,
                });

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("Interrupt received, letting in-flight calls finish");
                        eprintln!("Interrupted, finishing in-flight calls...");
                        cancel.cancel();
                    }
                }
            });

            let mut reports: Vec<RunReport> = Vec::new();
            let mut run_failed = false;
            for policy in selected {
                if cancel.is_cancelled() {
                    break;
                }
                match runner.run(policy, &cancel).await {
                    Ok(report) => reports.push(report),
                    Err(err) => {
                        tracing::error!("Policy {} failed: {}", policy.name, err);
                        eprintln!("Policy {} failed: {}", policy.name, describe(&err));
                        run_failed = true;
                    }
                }
            }

            println!("{}", report::render(&reports, *output, *show_excluded)?);

            if run_failed {
                Ok(ExitCode::from(1))
            } else if reports.iter().any(RunReport::has_failures) {
                Ok(ExitCode::from(2))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

/// User-facing description of a run error
fn describe(err: &PolicyError) -> String {
    match err {
        PolicyError::Fetch(FetchError::Remote { resource, source }) => {
            format!("listing {} failed: {}", resource, format_api_error(source))
        }
        other => other.to_string(),
    }
}
