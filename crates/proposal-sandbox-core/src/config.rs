//! Proposal list configuration.
//!
//! A config names the live chain, the reference point to fork at, how
//! commands are executed, and the ordered proposal list. Loading it with
//! [`SandboxPlan::load`] yields everything the coordinator needs.
//!
//! Environment overrides:
//! - `PROPOSAL_SANDBOX_LOGGING`: forces the logging toggle
//! - `PROPOSAL_SANDBOX_REFERENCE_BLOCK`: overrides `reference_block`
//! - `PROPOSAL_SANDBOX_LOG`: tracing filter, read by the CLI

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use proposal_sandbox_types::{env_flag, env_var, Address};

use crate::coordinator::{CoordinatorSettings, EnvironmentCoordinator};
use crate::declarative::ProposalFile;
use crate::errors::SandboxError;
use crate::events::{EventSink, Fanout, RecordingSink, TracingSink};
use crate::fork::{LiveChainSpec, LocalForkProvider, ReferencePoint};
use crate::governance::GovernanceSettings;
use crate::lifecycle::{ExecutionRoute, PlannedProposal, ProposalSchedule};

pub const CONFIG_VERSION: u32 = 1;

pub const LOG_FILTER_ENV: &str = "PROPOSAL_SANDBOX_LOG";
pub const LOGGING_ENV: &str = "PROPOSAL_SANDBOX_LOGGING";
pub const REFERENCE_BLOCK_ENV: &str = "PROPOSAL_SANDBOX_REFERENCE_BLOCK";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Direct,
    Governance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalEntry {
    pub name: String,
    /// Proposal file, relative to the config file.
    pub file: PathBuf,
    /// `false` when the proposal's contracts are already live.
    #[serde(default = "default_true")]
    pub deploy: bool,
    /// Contracts this proposal is signed off to touch. Empty means any.
    #[serde(default)]
    pub affected_contracts: Vec<String>,
    #[serde(default)]
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalsConfig {
    pub version: u32,
    /// Live chain description, relative to the config file.
    pub chain: PathBuf,
    /// Defaults to the chain's latest recorded block.
    #[serde(default)]
    pub reference_block: Option<u64>,
    #[serde(default)]
    pub executor: Option<Address>,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default)]
    pub governance: Option<GovernanceSettings>,
    #[serde(default = "default_true")]
    pub logging: bool,
    #[serde(default)]
    pub proposals: Vec<ProposalEntry>,
}

impl ProposalsConfig {
    /// Parse a config file (JSON for `.json`, YAML otherwise) and apply
    /// environment overrides. Does not validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: ProposalsConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?,
            _ => serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(logging) = env_flag(LOGGING_ENV) {
            self.logging = logging;
        }
        if let Some(block) = env_var::<u64>(REFERENCE_BLOCK_ENV) {
            tracing::debug!(block, "Reference block overridden from environment");
            self.reference_block = Some(block);
        }
    }

    /// Every problem with the config itself, in file order.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.version != CONFIG_VERSION {
            issues.push(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            ));
        }

        let mut names = BTreeSet::new();
        for (position, entry) in self.proposals.iter().enumerate() {
            if entry.name.trim().is_empty() {
                issues.push(format!("proposal #{} has an empty name", position));
            } else if !names.insert(entry.name.as_str()) {
                issues.push(format!("proposal name '{}' is used twice", entry.name));
            }
        }

        let current: Vec<usize> = self
            .proposals
            .iter()
            .enumerate()
            .filter(|(_, e)| e.current)
            .map(|(i, _)| i)
            .collect();
        if current.len() > 1 {
            issues.push(format!("{} proposals are marked current", current.len()));
        }
        if let Some(&position) = current.first() {
            if position + 1 != self.proposals.len() {
                issues.push(format!(
                    "current proposal '{}' must be last; {} proposal(s) after it would never run",
                    self.proposals[position].name,
                    self.proposals.len() - position - 1
                ));
            }
        }

        match (self.execution, &self.governance) {
            (ExecutionMode::Direct, _) if self.executor.is_none() => {
                issues.push("direct execution needs an 'executor' address".to_string());
            }
            (ExecutionMode::Governance, None) => {
                issues.push("governance execution needs a 'governance' block".to_string());
            }
            (ExecutionMode::Governance, Some(gov)) if gov.voters.is_empty() => {
                issues.push("governance block lists no voters".to_string());
            }
            _ => {}
        }
        issues
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::config(issues.join("; ")))
        }
    }

    pub fn route(&self) -> Result<ExecutionRoute, SandboxError> {
        match self.execution {
            ExecutionMode::Direct => self
                .executor
                .map(|executor| ExecutionRoute::Direct { executor })
                .ok_or_else(|| SandboxError::config("direct execution needs an 'executor' address")),
            ExecutionMode::Governance => self
                .governance
                .clone()
                .map(ExecutionRoute::Governance)
                .ok_or_else(|| SandboxError::config("governance execution needs a 'governance' block")),
        }
    }

    /// Sink for lifecycle events: always the recorder, plus tracing output
    /// when logging is on.
    pub fn event_sink(&self, recorder: &RecordingSink) -> Arc<dyn EventSink> {
        let mut fanout = Fanout::new().with(Arc::new(recorder.clone()));
        if self.logging {
            fanout = fanout.with(Arc::new(TracingSink));
        }
        Arc::new(fanout)
    }
}

/// Commands that touch contracts outside the entry's sign-off list.
pub fn sign_off_issues(entry: &ProposalEntry, file: &ProposalFile) -> Vec<String> {
    if entry.affected_contracts.is_empty() {
        return Vec::new();
    }
    file.commands
        .iter()
        .enumerate()
        .filter(|(_, c)| !entry.affected_contracts.iter().any(|a| a == &c.target))
        .map(|(index, c)| {
            format!(
                "proposal '{}' command #{} targets '{}', which is not in affected_contracts",
                entry.name, index, c.target
            )
        })
        .collect()
}

/// A fully loaded config: chain, schedule and coordinator settings.
pub struct SandboxPlan {
    pub config: ProposalsConfig,
    pub base_dir: PathBuf,
    pub provider: Arc<LocalForkProvider>,
    pub settings: CoordinatorSettings,
    pub schedule: ProposalSchedule,
}

/// Result of checking a config without running anything.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanCheck {
    pub proposals: usize,
    pub current: Option<String>,
    pub issues: Vec<String>,
}

impl PlanCheck {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// A file of the plan that cannot be read or parsed is a config error.
fn config_error(err: anyhow::Error) -> SandboxError {
    SandboxError::config(format!("{:#}", err))
}

fn load_chain(
    config: &ProposalsConfig,
    base_dir: &Path,
) -> Result<crate::fork::genesis::LiveChain, SandboxError> {
    let chain_path = base_dir.join(&config.chain);
    let spec = LiveChainSpec::load(&chain_path).map_err(config_error)?;
    spec.build().map_err(|err| match err {
        SandboxError::Config { message } => SandboxError::config(format!(
            "Failed to build chain {}: {}",
            chain_path.display(),
            message
        )),
        other => other,
    })
}

impl SandboxPlan {
    /// Load, validate and materialize a config. All config issues are
    /// reported together.
    pub fn load(path: &Path) -> Result<Self> {
        let config = ProposalsConfig::load(path).map_err(config_error)?;
        config.validate()?;
        let base_dir = base_dir(path);

        let mut entries = Vec::with_capacity(config.proposals.len());
        let mut issues = Vec::new();
        for entry in &config.proposals {
            let file = ProposalFile::load(&base_dir.join(&entry.file)).map_err(|err| {
                SandboxError::config(format!("proposal '{}': {:#}", entry.name, err))
            })?;
            issues.extend(sign_off_issues(entry, &file));
            let mut planned = PlannedProposal::new(file.into_proposal(entry.name.clone()));
            if !entry.deploy {
                planned = planned.without_deploy();
            }
            entries.push((planned, entry.current));
        }
        if !issues.is_empty() {
            bail!(SandboxError::config(issues.join("; ")));
        }
        let schedule = ProposalSchedule::from_flagged(entries)?;

        let chain = load_chain(&config, &base_dir)?;
        let route = config.route()?;
        let mut registry = chain.registry;
        if let ExecutionRoute::Direct { executor } = &route {
            if !registry.contains("executor") {
                registry.bind("executor", *executor);
            }
        }
        let reference = config
            .reference_block
            .map(ReferencePoint::at_block)
            .unwrap_or(chain.head);
        tracing::info!(
            proposals = schedule.len(),
            reference_block = reference.block,
            symbols = registry.len(),
            "Loaded plan"
        );

        Ok(Self {
            provider: Arc::new(chain.provider),
            settings: CoordinatorSettings {
                reference,
                route,
                base_registry: registry,
                base_contracts: chain.contracts,
            },
            schedule,
            config,
            base_dir,
        })
    }

    /// Check a config and every file it references, collecting issues
    /// instead of stopping at the first. Fails only when the config itself
    /// cannot be read.
    pub fn check(path: &Path) -> Result<PlanCheck> {
        let config = ProposalsConfig::load(path).map_err(config_error)?;
        let base_dir = base_dir(path);
        let mut report = PlanCheck {
            proposals: config.proposals.len(),
            current: config
                .proposals
                .iter()
                .find(|e| e.current)
                .map(|e| e.name.clone()),
            issues: config.issues(),
        };
        for entry in &config.proposals {
            match ProposalFile::load(&base_dir.join(&entry.file)) {
                Ok(file) => report.issues.extend(sign_off_issues(entry, &file)),
                Err(err) => report
                    .issues
                    .push(format!("proposal '{}': {:#}", entry.name, err)),
            }
        }
        if let Err(err) = load_chain(&config, &base_dir) {
            report.issues.push(format!("chain: {}", err));
        }
        Ok(report)
    }

    pub fn coordinator(&self, events: Arc<dyn EventSink>) -> EnvironmentCoordinator {
        EnvironmentCoordinator::new(self.provider.clone(), self.settings.clone(), events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> ProposalsConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = config("version: 1\nchain: chain.yaml\nexecutor: \"0xdead\"\n");
        assert!(cfg.logging);
        assert_eq!(cfg.execution, ExecutionMode::Direct);
        assert!(cfg.issues().is_empty());
        assert_eq!(
            cfg.route().unwrap(),
            ExecutionRoute::Direct {
                executor: Address::from_low_u64(0xdead)
            }
        );
    }

    #[test]
    fn test_collects_every_issue() {
        let cfg = config(
            r#"
version: 2
chain: chain.yaml
execution: governance
proposals:
  - { name: p1, file: p1.yaml, current: true }
  - { name: p1, file: p2.yaml }
  - { name: "", file: p3.yaml, current: true }
"#,
        );
        let issues = cfg.issues();
        assert_eq!(issues.len(), 6, "{:?}", issues);
        assert!(issues[0].contains("version 2"));
        assert!(issues.iter().any(|i| i.contains("used twice")));
        assert!(issues.iter().any(|i| i.contains("empty name")));
        assert!(issues.iter().any(|i| i.contains("2 proposals are marked current")));
        assert!(issues.iter().any(|i| i.contains("must be last")));
        assert!(issues.iter().any(|i| i.contains("'governance' block")));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_sign_off() {
        let entry = ProposalEntry {
            name: "p2".into(),
            file: "p2.yaml".into(),
            deploy: true,
            affected_contracts: vec!["vault".into()],
            current: false,
        };
        let file: ProposalFile = serde_yaml::from_str(
            r#"
title: t
commands:
  - { target: vault, method: "setCap(uint256)", args: [{ uint: 1 }] }
  - { target: recorder, method: "record(string)", args: [{ string: x }] }
"#,
        )
        .unwrap();
        let issues = sign_off_issues(&entry, &file);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("command #1 targets 'recorder'"));
    }

    fn config_kind(err: anyhow::Error) -> &'static str {
        err.downcast_ref::<SandboxError>()
            .map(SandboxError::kind)
            .unwrap_or("untyped")
    }

    #[test]
    fn test_unreadable_files_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("proposals.yaml");
        let err = SandboxPlan::load(&missing).err().unwrap();
        assert!(err.to_string().contains("Failed to read config"), "{}", err);
        assert_eq!(config_kind(err), "config");
        assert_eq!(config_kind(SandboxPlan::check(&missing).err().unwrap()), "config");

        std::fs::write(&missing, "version: [not a number\n").unwrap();
        let err = SandboxPlan::load(&missing).err().unwrap();
        assert!(err.to_string().contains("Failed to parse config"), "{}", err);
        assert_eq!(config_kind(err), "config");

        std::fs::write(
            &missing,
            "version: 1\nchain: chain.yaml\nexecutor: \"0xdead\"\nproposals:\n  - { name: p, file: p.yaml, current: true }\n",
        )
        .unwrap();
        let err = SandboxPlan::load(&missing).err().unwrap();
        assert!(err.to_string().contains("proposal 'p'"), "{}", err);
        assert_eq!(config_kind(err), "config");

        std::fs::write(dir.path().join("p.yaml"), "title: t\n").unwrap();
        std::fs::write(dir.path().join("chain.yaml"), "block: [\n").unwrap();
        let err = SandboxPlan::load(&missing).err().unwrap();
        assert!(err.to_string().contains("Failed to parse chain file"), "{}", err);
        assert_eq!(config_kind(err), "config");
    }

    #[test]
    fn test_event_sink_always_records() {
        let mut cfg = config("version: 1\nchain: c.yaml\nexecutor: \"0x1\"\nlogging: false\n");
        let recorder = RecordingSink::default();
        let sink = cfg.event_sink(&recorder);
        sink.emit(&crate::events::LifecycleEvent::GovernanceStep {
            proposal: "p".into(),
            detail: "d".into(),
        });
        assert_eq!(recorder.events().len(), 1);
        cfg.logging = true;
        cfg.event_sink(&recorder).emit(&crate::events::LifecycleEvent::GovernanceStep {
            proposal: "p".into(),
            detail: "d".into(),
        });
        assert_eq!(recorder.events().len(), 2);
    }
}
