//! `run`: replay history, then drive the current proposal through every phase.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use proposal_sandbox_core::coordinator::EnvironmentReport;
use proposal_sandbox_core::events::{LifecycleEvent, RecordingSink};
use proposal_sandbox_core::SandboxPlan;

use super::output::{format_environment_report, print_json};

#[derive(Parser, Debug)]
#[command(about = "Replay history and run the current proposal")]
pub struct RunCmd {
    /// Path to the proposals config (YAML or JSON)
    pub config: PathBuf,

    /// Include every lifecycle event in the JSON output
    #[arg(long, default_value_t = false)]
    pub events: bool,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    success: bool,
    #[serde(flatten)]
    report: &'a EnvironmentReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<LifecycleEvent>>,
}

impl RunCmd {
    pub async fn execute(&self, json: bool, verbose: bool) -> Result<()> {
        let plan = SandboxPlan::load(&self.config)?;
        let recorder = RecordingSink::default();
        let coordinator = plan.coordinator(plan.config.event_sink(&recorder));
        let report = coordinator.run(&plan.schedule).await?;

        if json {
            print_json(&RunOutput {
                success: true,
                report: &report,
                events: self.events.then(|| recorder.events()),
            })?;
        } else {
            print!("{}", format_environment_report(&report, verbose));
        }
        Ok(())
    }
}
