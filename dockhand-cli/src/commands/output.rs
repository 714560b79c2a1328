//! Terminal output helpers shared by the command handlers

use colored::*;
use dockhand_core::domain::instance::ApplyReport;
use dockhand_core::domain::log::{LogEntry, LogLevel};
use dockhand_core::domain::run::{PipelineRun, RunState, StageStatus};
use dockhand_core::dto::run::RunSummary;

/// Colorize run state for display
pub fn colorize_state(state: RunState) -> ColoredString {
    let text = state.to_string();
    match state {
        RunState::Idle => text.dimmed(),
        RunState::Building | RunState::Publishing | RunState::Deploying => text.cyan(),
        RunState::Succeeded => text.green(),
        RunState::Failed => text.red(),
    }
}

fn colorize_stage(status: StageStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        StageStatus::Pending | StageStatus::Skipped => text.dimmed(),
        StageStatus::Running => text.cyan(),
        StageStatus::Succeeded => text.green(),
        StageStatus::Failed => text.red(),
    }
}

/// Print a log entry
pub fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.to_string();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };
    let stage = log
        .stage
        .as_deref()
        .map(|s| format!("{} ", s))
        .unwrap_or_default();

    println!(
        "{} [{}] {}{}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        stage.bold(),
        log.message
    );
}

/// Print a one-run summary line block
pub fn print_run_summary(run: &RunSummary) {
    println!("  {} Run {}", "▸".cyan(), run.id.to_string().dimmed());
    println!("    Trigger:  {}", run.trigger);
    println!("    State:    {}", colorize_state(run.state));
    println!(
        "    Created:  {}",
        run.requested_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(stage) = &run.failed_stage {
        println!("    Failed:   {}", stage.red());
    }
    println!();
}

/// Print detailed run information
pub fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:          {}", run.id.to_string().cyan());
    println!("  Pipeline:    {}", run.pipeline);
    println!("  Trigger:     {}", run.trigger);
    println!("  State:       {}", colorize_state(run.state));
    println!(
        "  Requested:   {}",
        run.requested_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = run.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(finished) = run.finished_at {
        println!("  Finished:    {}", finished.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = run.started_at {
            let duration = finished.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    println!("\n{}", "Stages:".bold());
    for stage in &run.stages {
        println!("  {:<24} {}", stage.name, colorize_stage(stage.status));
        if let Some(error) = &stage.error {
            println!("    {}", error.red());
        }
    }

    if !run.artifacts.is_empty() {
        println!("\n{}", "Artifacts:".bold());
        for artifact in &run.artifacts {
            println!(
                "  {} {} [{}]",
                artifact.repository.cyan(),
                artifact.short_id().dimmed(),
                artifact.tags.join(", ")
            );
        }
    }

    if let Some(error) = &run.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

/// Print what an apply pass did
pub fn print_apply_report(report: &ApplyReport) {
    for image in &report.pulled {
        println!("  {} pulled    {}", "↓".cyan(), image);
    }
    for service in &report.recreated {
        println!("  {} recreated {}", "↻".green(), service.bold());
    }
    for service in &report.restarted {
        println!("  {} restarted {}", "▶".yellow(), service.bold());
    }
    for service in &report.unchanged {
        println!("  {} unchanged {}", "=".dimmed(), service.dimmed());
    }
}
