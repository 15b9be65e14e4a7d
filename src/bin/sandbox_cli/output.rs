//! Output formatting for proposal-sandbox CLI
//!
//! Provides human-readable and JSON output formatting for all commands.

use anyhow::Result;
use serde::Serialize;

use proposal_sandbox_core::config::PlanCheck;
use proposal_sandbox_core::coordinator::{EnvironmentReport, ProposalPreview};
use proposal_sandbox_core::{AddressRegistry, LifecycleReport, SandboxError};
use proposal_sandbox_types::format_values;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render an error chain. A [`SandboxError`] already renders its own
/// source, so the chain stops there.
pub fn render_error(err: &anyhow::Error) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        parts.push(cause.to_string());
        if cause.is::<SandboxError>() {
            break;
        }
    }
    parts.join(": ")
}

pub fn print_error(command: &str, err: &anyhow::Error, json: bool) {
    let sandbox = err.downcast_ref::<SandboxError>();
    if json {
        let body = serde_json::json!({
            "success": false,
            "command": command,
            "kind": sandbox.map(SandboxError::kind).unwrap_or("error"),
            "fixture_error": sandbox.map(SandboxError::is_fixture_error).unwrap_or(false),
            "error": render_error(err),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
        );
    } else {
        eprintln!("\x1b[31m✗ {} failed:\x1b[0m {}", command, render_error(err));
    }
}

/// Format one proposal's lifecycle report
pub fn format_lifecycle_report(report: &LifecycleReport, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\x1b[1m{}\x1b[0m \"{}\" ({:?}, {} ms)\n",
        report.proposal, report.title, report.mode, report.elapsed_ms
    ));

    if verbose {
        for phase in &report.phases {
            let note = if phase.skipped { " (skipped)" } else { "" };
            out.push_str(&format!(
                "  phase {:<9} {:>5} ms{}\n",
                phase.phase.as_str(),
                phase.elapsed_ms,
                note
            ));
        }
    }

    if !report.new_symbols.is_empty() {
        out.push_str(&format!("  deployed: {}\n", report.new_symbols.join(", ")));
    }

    for command in &report.commands {
        let label = if command.description.is_empty() {
            format!("{}.{}", command.target, command.method)
        } else {
            command.description.clone()
        };
        out.push_str(&format!(
            "  \x1b[36m#{}\x1b[0m {} -> {} (block {})\n",
            command.index,
            label,
            command.address.to_short_string(),
            command.block
        ));
    }

    for record in &report.assertions {
        let mark = if record.passed {
            "\x1b[32m✓\x1b[0m"
        } else {
            "\x1b[31m✗\x1b[0m"
        };
        out.push_str(&format!("  {} {}\n", mark, record));
    }
    out
}

pub fn format_registry(registry: &AddressRegistry) -> String {
    let mut out = String::new();
    let width = registry.symbols().map(str::len).max().unwrap_or(0);
    for (symbol, address) in registry.iter() {
        out.push_str(&format!("  {:<width$}  {}\n", symbol, address, width = width));
    }
    out
}

/// Format a full environment run
pub fn format_environment_report(report: &EnvironmentReport, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Run {} started {} forked at block {} ({} replayed, {} ms)\n\n",
        report.run_id,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.reference_block,
        report.history.len(),
        report.elapsed_ms
    ));

    if !report.history.is_empty() {
        out.push_str("\x1b[1mHistory:\x1b[0m\n");
        for history in &report.history {
            if verbose {
                out.push_str(&format_lifecycle_report(history, verbose));
            } else {
                out.push_str(&format!(
                    "  {} \"{}\": {} command(s)\n",
                    history.proposal,
                    history.title,
                    history.commands.len()
                ));
            }
        }
        out.push('\n');
    }

    match &report.current {
        Some(current) => {
            out.push_str("\x1b[1mCurrent proposal:\x1b[0m\n");
            out.push_str(&format_lifecycle_report(current, verbose));
            out.push_str("\n\x1b[32m✓ Proposal validated\x1b[0m\n");
        }
        None => out.push_str("No proposal is marked current; history replayed only.\n"),
    }

    if verbose {
        out.push_str(&format!(
            "\n\x1b[1mRegistry at block {}:\x1b[0m\n",
            report.head.number
        ));
        out.push_str(&format_registry(&report.registry));
    }
    out
}

/// Format a preview of resolved actions
pub fn format_preview(preview: &ProposalPreview) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\x1b[1m{}\x1b[0m \"{}\" at block {}\n",
        preview.proposal, preview.title, preview.reference_block
    ));
    if !preview.replayed.is_empty() {
        out.push_str(&format!("  after: {}\n", preview.replayed.join(", ")));
    }
    if !preview.new_symbols.is_empty() {
        out.push_str(&format!("  deploys: {}\n", preview.new_symbols.join(", ")));
    }
    out.push('\n');

    for action in &preview.actions {
        out.push_str(&format!(
            "  \x1b[36m#{}\x1b[0m {} ({})\n",
            action.index, action.target, action.address
        ));
        if !action.description.is_empty() {
            out.push_str(&format!("     {}\n", action.description));
        }
        out.push_str(&format!(
            "     {}({})",
            action.method,
            format_values(&action.args)
        ));
        if action.value > 0 {
            out.push_str(&format!(" value {}", action.value));
        }
        out.push('\n');
        out.push_str(&format!("     calldata 0x{}\n", hex::encode(action.calldata())));
    }

    if !preview.issues.is_empty() {
        out.push_str("\n\x1b[33mIssues:\x1b[0m\n");
        for issue in &preview.issues {
            out.push_str(&format!("  - {}\n", issue));
        }
    }
    out
}

pub fn format_check(config: &str, check: &PlanCheck) -> String {
    let mut out = String::new();
    if check.is_ok() {
        out.push_str(&format!(
            "\x1b[32m✓ {} is valid\x1b[0m ({} proposal(s)",
            config, check.proposals
        ));
        if let Some(current) = &check.current {
            out.push_str(&format!(", current: {}", current));
        }
        out.push_str(")\n");
    } else {
        out.push_str(&format!(
            "\x1b[31m✗ {} has {} issue(s):\x1b[0m\n",
            config,
            check.issues.len()
        ));
        for issue in &check.issues {
            out.push_str(&format!("  - {}\n", issue));
        }
    }
    out
}
