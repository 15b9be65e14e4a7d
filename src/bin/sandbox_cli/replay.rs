//! `replay`: replay every proposal as history and print the resulting registry.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use proposal_sandbox_core::events::RecordingSink;
use proposal_sandbox_core::SandboxPlan;

use super::output::{format_registry, print_json};

#[derive(Parser, Debug)]
#[command(about = "Replay every proposal, the current one included, as history")]
pub struct ReplayCmd {
    /// Path to the proposals config (YAML or JSON)
    pub config: PathBuf,
}

impl ReplayCmd {
    pub async fn execute(&self, json: bool) -> Result<()> {
        let plan = SandboxPlan::load(&self.config)?;
        let recorder = RecordingSink::default();
        let coordinator = plan.coordinator(plan.config.event_sink(&recorder));
        let report = coordinator.replay_all(&plan.schedule).await?;

        if json {
            print_json(&serde_json::json!({
                "success": true,
                "run_id": report.run_id,
                "reference_block": report.reference_block,
                "replayed": report.history.iter().map(|h| h.proposal.as_str()).collect::<Vec<_>>(),
                "head": report.head,
                "registry": report.registry,
            }))?;
        } else {
            println!(
                "Replayed {} proposal(s) from block {}; head is block {}\n",
                report.history.len(),
                report.reference_block,
                report.head.number
            );
            print!("{}", format_registry(&report.registry));
        }
        Ok(())
    }
}
