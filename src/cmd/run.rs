//! Workflow execution: `conductor run <workflow>`.

use anyhow::Result;
use console::{Term, style};
use std::path::{Path, PathBuf};

use super::super::Cli;

pub struct RunArgs<'a> {
    pub workflow: &'a str,
    pub resume: bool,
    pub only: &'a [String],
    pub skip_validation: bool,
    pub skip_quality: bool,
}

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    if !project_dir.join(".conductor").is_dir() {
        anyhow::bail!("Project not initialized. Run 'conductor init' first.");
    }
    Ok(())
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, args: RunArgs<'_>) -> Result<()> {
    use conductor::config::Config;
    use conductor::operator::{InteractiveOperator, NonInteractiveOperator, Operator};
    use conductor::workflow::{RunOptions, Workflow};

    check_run_prerequisites(&project_dir)?;

    let config = Config::new(project_dir, cli.verbose, cli.yes)?;
    config.ensure_directories()?;

    let warnings = config.toml.validate();
    if !warnings.is_empty() {
        for warning in &warnings {
            eprintln!("  - {}", warning);
        }
        anyhow::bail!(
            "Configuration has {} problem(s); run 'conductor config validate'",
            warnings.len()
        );
    }

    let workflow = Workflow::from_config(&config, args.workflow)?;
    let interactive = !config.yes && Term::stderr().is_term();
    let mut operator: Box<dyn Operator> = if interactive {
        Box::new(InteractiveOperator::default())
    } else {
        Box::new(NonInteractiveOperator::new(config.toml.policies()))
    };

    let options = RunOptions {
        resume: args.resume,
        only: args.only.to_vec(),
        skip_validation: args.skip_validation,
        skip_quality: args.skip_quality,
        show_progress: Term::stderr().is_term(),
    };

    let outcome = workflow.run(&options, operator.as_mut()).await?;

    println!();
    print!("{}", outcome.report.render());
    println!(
        "Report written to {}",
        style(workflow.paths().report_file.display()).dim()
    );

    match outcome.into_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
