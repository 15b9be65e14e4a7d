//! `check`: validate a config and every proposal file it references.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use proposal_sandbox_core::{SandboxError, SandboxPlan};

use super::output::{format_check, print_json};

#[derive(Parser, Debug)]
#[command(about = "Validate a config and the proposal files it references")]
pub struct CheckCmd {
    /// Path to the proposals config (YAML or JSON)
    pub config: PathBuf,
}

impl CheckCmd {
    pub fn execute(&self, json: bool) -> Result<()> {
        let check = SandboxPlan::check(&self.config)?;
        if json {
            print_json(&serde_json::json!({
                "success": check.is_ok(),
                "config": self.config.display().to_string(),
                "proposals": check.proposals,
                "current": check.current,
                "issues": check.issues,
            }))?;
        } else {
            print!("{}", format_check(&self.config.display().to_string(), &check));
        }

        if check.is_ok() {
            Ok(())
        } else {
            Err(SandboxError::config(format!("{} issue(s) found", check.issues.len())).into())
        }
    }
}
