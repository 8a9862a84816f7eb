use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor::logging::{self, LogFormat};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Multi-phase workflow orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never prompt; apply the configured policies instead
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Format of the diagnostic log on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a conductor project
    Init,
    /// Run a workflow's phases, validation and quality gate
    Run {
        workflow: String,

        /// Skip phases the audit log records as succeeded
        #[arg(long)]
        from_audit: bool,

        /// Run only these phases (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        #[arg(long)]
        skip_validation: bool,

        #[arg(long)]
        skip_quality: bool,
    },
    /// Show the most recent status of every phase
    Status { workflow: String },
    /// Render the workflow report from the audit log
    Report {
        workflow: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print raw audit entries
    Audit {
        workflow: String,

        /// Only entries about this phase
        #[arg(short, long)]
        phase: Option<String>,
    },
    /// Check whether a workflow name is acceptable
    CheckName { name: String },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Extract a quality score from a file ("-" reads stdin)
    Score {
        file: PathBuf,

        /// Fail unless the score reaches this minimum
        #[arg(long)]
        minimum: Option<f32>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let state_dir = project_dir.join(".conductor");
    let log_dir = state_dir.is_dir().then(|| state_dir.join("logs"));
    let _guard = logging::init(cli.verbose, cli.log_format, log_dir.as_deref())?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            workflow,
            from_audit,
            only,
            skip_validation,
            skip_quality,
        } => {
            let options = cmd::RunArgs {
                workflow,
                resume: *from_audit,
                only,
                skip_validation: *skip_validation,
                skip_quality: *skip_quality,
            };
            cmd::cmd_run(&cli, project_dir, options).await?;
        }
        Commands::Status { workflow } => cmd::cmd_status(&project_dir, workflow)?,
        Commands::Report { workflow, json } => cmd::cmd_report(&project_dir, workflow, *json)?,
        Commands::Audit { workflow, phase } => {
            cmd::cmd_audit(&project_dir, workflow, phase.as_deref())?
        }
        Commands::CheckName { name } => cmd::cmd_check_name(name)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Score { file, minimum } => cmd::cmd_score(file, *minimum)?,
    }

    Ok(())
}
