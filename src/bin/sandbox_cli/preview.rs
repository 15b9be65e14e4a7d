//! `preview`: resolve a proposal's commands against the replayed environment
//! without sending them.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;

use proposal_sandbox_core::events::NullSink;
use proposal_sandbox_core::SandboxPlan;
use proposal_sandbox_types::{Address, MethodSignature, Value};

use super::output::{format_preview, print_json};

#[derive(Parser, Debug)]
#[command(about = "Resolve a proposal's commands without executing them")]
pub struct PreviewCmd {
    /// Path to the proposals config (YAML or JSON)
    pub config: PathBuf,

    /// Proposal to preview (default: the current proposal, else the last one)
    #[arg(long)]
    pub proposal: Option<String>,
}

#[derive(Serialize)]
struct PreviewAction<'a> {
    index: usize,
    target: &'a str,
    address: Address,
    value: String,
    method: &'a MethodSignature,
    args: &'a [Value],
    calldata: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
}

impl PreviewCmd {
    pub async fn execute(&self, json: bool) -> Result<()> {
        let plan = SandboxPlan::load(&self.config)?;
        let name = match &self.proposal {
            Some(name) => name.clone(),
            None => plan
                .schedule
                .current
                .as_ref()
                .or_else(|| plan.schedule.history.last())
                .map(|p| p.proposal.name.clone())
                .ok_or_else(|| anyhow!("config lists no proposals"))?,
        };
        // Preview output is the point; lifecycle events would only add noise.
        let coordinator = plan.coordinator(std::sync::Arc::new(NullSink));
        let preview = coordinator.preview(&plan.schedule, &name).await?;

        if json {
            let actions: Vec<PreviewAction<'_>> = preview
                .actions
                .iter()
                .map(|a| PreviewAction {
                    index: a.index,
                    target: &a.target,
                    address: a.address,
                    value: a.value.to_string(),
                    method: &a.method,
                    args: &a.args,
                    calldata: format!("0x{}", hex::encode(a.calldata())),
                    description: &a.description,
                })
                .collect();
            print_json(&serde_json::json!({
                "success": preview.issues.is_empty(),
                "proposal": preview.proposal,
                "title": preview.title,
                "reference_block": preview.reference_block,
                "replayed": preview.replayed,
                "new_symbols": preview.new_symbols,
                "actions": actions,
                "issues": preview.issues,
            }))?;
        } else {
            print!("{}", format_preview(&preview));
        }
        Ok(())
    }
}
