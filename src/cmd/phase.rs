//! Read-only views of a workflow's audit log: status, report, audit.

use anyhow::Result;
use console::style;
use std::path::Path;

use conductor::config::Config;
use conductor::workflow::Workflow;

fn load_workflow(project_dir: &Path, workflow: &str) -> Result<(Config, Workflow)> {
    let config = Config::new(project_dir.to_path_buf(), false, true)?;
    let workflow = Workflow::from_config(&config, workflow)?;
    Ok((config, workflow))
}

pub fn cmd_status(project_dir: &Path, workflow: &str) -> Result<()> {
    let (_, workflow) = load_workflow(project_dir, workflow)?;
    let report = workflow.report()?;

    println!();
    println!("Workflow: {}", style(workflow.name()).cyan().bold());
    println!("Audit log: {}", workflow.audit().path().display());
    println!();
    println!("{:<24} {:<10} {:<8} Group", "Phase", "Status", "Attempts");
    println!(
        "{:<24} {:<10} {:<8} -----",
        "------------------------", "----------", "--------"
    );
    for line in &report.phases {
        let status = match line.status {
            Some(status) => status.to_string(),
            None if line.blocked => "blocked".to_string(),
            None => "-".to_string(),
        };
        println!(
            "{:<24} {:<10} {:<8} {}",
            line.name,
            status,
            line.attempts,
            line.group.as_deref().unwrap_or("")
        );
    }
    println!();

    let coverage = &report.coverage;
    if coverage.is_complete() {
        println!("All {} phases succeeded.", report.phases.len());
    } else {
        println!(
            "{} of {} phases succeeded.",
            coverage.found.len() - coverage.failed_names.len(),
            report.phases.len()
        );
        if !coverage.missing.is_empty() {
            println!("  Not run: {}", coverage.missing.join(", "));
        }
        if !coverage.failed_names.is_empty() {
            println!("  Failed:  {}", coverage.failed_names.join(", "));
        }
        if !coverage.incomplete.is_empty() {
            println!("  Started without an outcome: {}", coverage.incomplete.join(", "));
        }
    }
    Ok(())
}

pub fn cmd_report(project_dir: &Path, workflow: &str, json: bool) -> Result<()> {
    let (_, workflow) = load_workflow(project_dir, workflow)?;
    let report = workflow.report()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

pub fn cmd_audit(project_dir: &Path, workflow: &str, phase: Option<&str>) -> Result<()> {
    use conductor::audit::AuditLog;

    let config = Config::new(project_dir.to_path_buf(), false, true)?;
    let paths = config.run_paths(workflow)?;
    let audit = AuditLog::new(paths.audit_file);

    let entries = audit.entries()?;
    if entries.is_empty() {
        println!("No audit entries for workflow '{}'.", workflow);
        return Ok(());
    }

    for entry in entries
        .iter()
        .filter(|e| phase.is_none_or(|p| e.phase == p))
    {
        let what = match (&entry.status, &entry.event) {
            (Some(status), _) => status.to_string(),
            (None, Some(event)) => format!("[{}]", event),
            (None, None) => "-".to_string(),
        };
        let mut line = format!(
            "{}  {:<24} {:<20}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.phase,
            what
        );
        if let Some(attempt) = entry.attempt {
            line.push_str(&format!(" attempt {}", attempt));
        }
        if let Some(code) = entry.exit_code {
            line.push_str(&format!(" exit {}", code));
        }
        if let Some(detail) = &entry.detail {
            line.push_str(&format!("  {}", detail));
        }
        println!("{}", line);
    }
    Ok(())
}
