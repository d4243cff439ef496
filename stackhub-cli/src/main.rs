use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use stackhub_core::lifecycle::OsEnvironmentMode;
use stackhub_core::state::ExplainFormat;
use stackhub_core::{Config, HubError, Warnings};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "hub")]
#[command(about = "Stack lifecycle engine", long_about = None)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, env = "HUB_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a stack manifest and parameter files into an elaborate manifest
    Elaborate {
        /// Stack manifest (hub.yaml)
        manifest: PathBuf,

        /// Parameter manifests, applied left to right
        params: Vec<PathBuf>,

        /// Parameter overrides (NAME=VALUE or NAME|component=VALUE)
        #[arg(short, long, value_delimiter = ',')]
        env: Vec<String>,

        /// State files whose locked values are carried over
        #[arg(short, long, value_delimiter = ',')]
        state: Vec<String>,

        /// Output files
        #[arg(short, long, value_delimiter = ',')]
        output: Vec<PathBuf>,

        /// Directory component sources are resolved against
        #[arg(long, env = "HUB_COMPONENTS_BASEDIR")]
        base_dir: Option<String>,

        /// Expand unresolved names to <name> instead of failing
        #[arg(long)]
        auto_resolve: bool,
    },

    /// Deploy the stack
    Deploy(LifecycleArgs),

    /// Undeploy the stack, in reverse order
    Undeploy(LifecycleArgs),

    /// Run the backup verb of every component
    Backup(LifecycleArgs),

    /// Run one verb of one component
    Invoke {
        component: String,
        verb: String,

        #[command(flatten)]
        files: FileArgs,

        /// Run the <verb>-test variant
        #[arg(short = 'y', long)]
        dry_run: bool,
    },

    /// Show the recorded state of a stack
    Explain {
        /// State files
        #[arg(short, long, value_delimiter = ',')]
        state: Vec<String>,

        /// Output format: text, yaml or json
        #[arg(long, default_value = "text")]
        format: ExplainFormat,

        /// Only this component
        #[arg(short, long)]
        component: Option<String>,

        /// Print secret outputs in clear
        #[arg(long)]
        show_secrets: bool,

        /// Include the operation log
        #[arg(long)]
        operations: bool,
    },

    /// Print the resolved component order of a stack manifest
    Order {
        manifest: PathBuf,
    },
}

#[derive(Args)]
struct FileArgs {
    /// Elaborate manifests
    #[arg(short = 'm', long, value_delimiter = ',')]
    elaborate: Vec<PathBuf>,

    /// State files
    #[arg(short, long, value_delimiter = ',')]
    state: Vec<String>,

    /// Directory component sources are resolved against
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// YAML map of secret references to values
    #[arg(long = "secrets-file", env = "HUB_SECRETS_FILE")]
    secrets: Option<PathBuf>,

    /// Capture component output without relaying it
    #[arg(long)]
    silent: bool,

    /// Environment passed to components: everything, no-tfvars or strict
    #[arg(long = "os-environment")]
    os_environment: Option<OsEnvironmentMode>,

    /// Extra variables for components (NAME=VALUE)
    #[arg(short, long, value_delimiter = ',')]
    env: Vec<String>,
}

#[derive(Args)]
struct LifecycleArgs {
    /// Elaborate manifest, defaults to the configured file
    elaborate_file: Option<PathBuf>,

    #[command(flatten)]
    files: FileArgs,

    /// Run only these components
    #[arg(short, long, value_delimiter = ',')]
    components: Vec<String>,

    /// Start at this component
    #[arg(short, long)]
    offset: Option<String>,

    /// Stop after this component
    #[arg(short, long)]
    limit: Option<String>,

    /// Start at the first component not completed in the state
    #[arg(short, long)]
    guess: bool,

    /// Run the <verb>-test scripts without touching recorded results
    #[arg(short = 'y', long)]
    dry_run: bool,

    /// Keep going past failures, recording the rest as skipped
    #[arg(short, long)]
    force: bool,

    /// Write a control-plane patch after the run
    #[arg(long)]
    hub_sync: bool,

    /// Patch destination, defaults to the configured sync file
    #[arg(long)]
    hub_sync_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let warnings = Warnings::new();

    let result = run(cli, warnings.clone()).await;

    let all = warnings.all();
    if !all.is_empty() {
        eprintln!();
        eprintln!("{} {} warning(s):", "!".yellow().bold(), all.len());
        for warning in &all {
            eprintln!("  {} {}", "•".dimmed(), warning);
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            let code = e.downcast_ref::<HubError>().map(HubError::exit_code).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli, warnings: Warnings) -> Result<()> {
    let config = Config::load()?;
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    if let Err(e) = stackhub_core::init_observability(&level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Elaborate { manifest, params, env, state, output, base_dir, auto_resolve } => {
            commands::elaborate::elaborate(
                &config,
                &warnings,
                commands::elaborate::ElaborateArgs {
                    manifest,
                    params,
                    overrides: env,
                    state,
                    output,
                    base_dir,
                    auto_resolve,
                },
            )?;
        }

        Commands::Deploy(args) => {
            commands::lifecycle::run(&config, &warnings, "deploy", args.into()).await?;
        }
        Commands::Undeploy(args) => {
            commands::lifecycle::run(&config, &warnings, "undeploy", args.into()).await?;
        }
        Commands::Backup(args) => {
            commands::lifecycle::run(&config, &warnings, "backup", args.into()).await?;
        }

        Commands::Invoke { component, verb, files, dry_run } => {
            commands::invoke::invoke(&config, &warnings, &component, &verb, files.into(), dry_run)
                .await?;
        }

        Commands::Explain { state, format, component, show_secrets, operations } => {
            commands::explain::explain(
                &config,
                &state,
                format,
                component,
                show_secrets,
                operations,
            )?;
        }

        Commands::Order { manifest } => {
            commands::order::order(&manifest, &warnings)?;
        }
    }

    Ok(())
}

impl From<FileArgs> for commands::Files {
    fn from(args: FileArgs) -> Self {
        Self {
            elaborate: args.elaborate,
            state: args.state,
            base_dir: args.base_dir,
            secrets: args.secrets,
            os_environment: args.os_environment,
            env: args.env,
            silent: args.silent,
        }
    }
}

impl From<LifecycleArgs> for commands::lifecycle::LifecycleOptions {
    fn from(args: LifecycleArgs) -> Self {
        let mut files: commands::Files = args.files.into();
        if let Some(path) = args.elaborate_file {
            files.elaborate.insert(0, path);
        }
        Self {
            files,
            components: args.components,
            offset: args.offset,
            limit: args.limit,
            guess: args.guess,
            dry_run: args.dry_run,
            force: args.force,
            hub_sync: args.hub_sync,
            hub_sync_file: args.hub_sync_file,
        }
    }
}
