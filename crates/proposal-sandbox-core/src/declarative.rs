//! Proposals authored as data.
//!
//! A proposal file carries the descriptor plus declarative steps for every
//! hook. [`DeclarativeHooks`] interprets those steps, so a proposal that
//! needs no custom logic never has to be compiled.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use proposal_sandbox_types::value::{wide_uint, wide_uint_opt};
use proposal_sandbox_types::{format_values, Address, MethodSignature, Value};

use crate::command::{Arg, Command, ProposalDescriptor};
use crate::lifecycle::{DeployContext, PhaseContext, Proposal, ProposalHooks};
use crate::registry::{AddressRegistry, NamedContracts};
use crate::verify::Verifier;

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStep {
    /// Registry symbol the new contract is bound to.
    pub name: String,
    pub artifact: String,
    #[serde(default)]
    pub args: Vec<Arg>,
}

/// An account named in a step: a tagged argument, a registry symbol, or a
/// bare hex address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Party {
    Arg(Arg),
    Plain(String),
}

impl Party {
    pub fn resolve(&self, registry: &AddressRegistry) -> Result<Address> {
        match self {
            Party::Arg(arg) => {
                let value = arg.resolve(registry)?;
                value
                    .as_address()
                    .ok_or_else(|| anyhow!("expected an account, got {}", value))
            }
            Party::Plain(raw) => match registry.get(raw) {
                Some(address) => Ok(address),
                None => Address::parse(raw)
                    .with_context(|| format!("'{}' is neither a known symbol nor an address", raw)),
            },
        }
    }
}

/// One `setup` or `teardown` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Add native balance to an account.
    Fund {
        account: Party,
        #[serde(with = "wide_uint")]
        amount: u128,
    },
    /// Call a contract as an impersonated account.
    Call {
        #[serde(rename = "as")]
        from: Party,
        target: String,
        method: MethodSignature,
        #[serde(default)]
        args: Vec<Arg>,
        #[serde(default, with = "wide_uint")]
        value: u128,
    },
    /// Move the clock forward.
    Advance {
        #[serde(default)]
        seconds: u64,
        #[serde(default)]
        blocks: u64,
    },
    /// Store a read result for a later `unchanged` check.
    Capture {
        name: String,
        target: String,
        method: MethodSignature,
        #[serde(default)]
        args: Vec<Arg>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Read and compare against `expect`, within `tolerance` if given.
    Read {
        target: String,
        method: MethodSignature,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Read and compare against a value captured earlier.
    Unchanged {
        capture: String,
        target: String,
        method: MethodSignature,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Always fails.
    Fail(String),
}

/// One `validate` entry.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: CheckKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<Arg>,
    #[serde(with = "wide_uint_opt", skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u128>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadSpec {
    target: String,
    method: MethodSignature,
    #[serde(default)]
    args: Vec<Arg>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UnchangedSpec {
    capture: String,
    target: String,
    method: MethodSignature,
    #[serde(default)]
    args: Vec<Arg>,
}

#[derive(Deserialize)]
struct Tolerance(#[serde(with = "wide_uint_opt")] Option<u128>);

// Read field by field rather than through `flatten`, whose buffering cannot
// hold 128-bit `expect` or `tolerance` amounts.
impl<'de> Deserialize<'de> for Check {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CheckVisitor;

        impl<'de> Visitor<'de> for CheckVisitor {
            type Value = Check;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a validate check with one of 'read', 'unchanged' or 'fail'")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Check, A::Error> {
                let mut label = None;
                let mut kind: Option<CheckKind> = None;
                let mut expect = None;
                let mut tolerance = None;
                while let Some(key) = map.next_key::<String>()? {
                    let next = match key.as_str() {
                        "label" => {
                            label = Some(map.next_value()?);
                            continue;
                        }
                        "expect" => {
                            expect = Some(map.next_value()?);
                            continue;
                        }
                        "tolerance" => {
                            tolerance = map.next_value::<Tolerance>()?.0;
                            continue;
                        }
                        "read" => {
                            let spec: ReadSpec = map.next_value()?;
                            CheckKind::Read {
                                target: spec.target,
                                method: spec.method,
                                args: spec.args,
                            }
                        }
                        "unchanged" => {
                            let spec: UnchangedSpec = map.next_value()?;
                            CheckKind::Unchanged {
                                capture: spec.capture,
                                target: spec.target,
                                method: spec.method,
                                args: spec.args,
                            }
                        }
                        "fail" => CheckKind::Fail(map.next_value()?),
                        other => {
                            return Err(de::Error::unknown_field(
                                other,
                                &["label", "read", "unchanged", "fail", "expect", "tolerance"],
                            ))
                        }
                    };
                    if kind.replace(next).is_some() {
                        return Err(de::Error::custom(
                            "a check takes exactly one of 'read', 'unchanged' or 'fail'",
                        ));
                    }
                }
                let kind = kind.ok_or_else(|| de::Error::missing_field("read"))?;
                Ok(Check {
                    label,
                    kind,
                    expect,
                    tolerance,
                })
            }
        }

        deserializer.deserialize_map(CheckVisitor)
    }
}

impl Check {
    fn label(&self, index: usize) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.kind {
            CheckKind::Read { target, method, .. } => format!("{}.{}", target, method),
            CheckKind::Unchanged {
                target, method, ..
            } => format!("{}.{} unchanged", target, method),
            CheckKind::Fail(_) => format!("check #{}", index),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalFile {
    pub title: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub deploy: Vec<DeployStep>,
    #[serde(default)]
    pub setup: Vec<Step>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub teardown: Vec<Step>,
    #[serde(default)]
    pub validate: Vec<Check>,
}

impl ProposalFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read proposal file {}", path.display()))?;
        let file: ProposalFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse proposal file {}", path.display()))?,
            _ => serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse proposal file {}", path.display()))?,
        };
        file.check()
            .with_context(|| format!("Invalid proposal file {}", path.display()))?;
        Ok(file)
    }

    /// Structural checks that need no chain.
    pub fn check(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for step in &self.deploy {
            if !names.insert(step.name.as_str()) {
                bail!("deploy step '{}' is declared twice", step.name);
            }
        }
        for (index, check) in self.validate.iter().enumerate() {
            match (&check.kind, &check.expect) {
                (CheckKind::Read { .. }, None) => {
                    bail!("validate check #{} ({}) has no 'expect'", index, check.label(index))
                }
                (CheckKind::Read { .. }, Some(_)) => {}
                (_, Some(_)) => bail!(
                    "validate check #{} ({}) does not take 'expect'",
                    index,
                    check.label(index)
                ),
                _ => {}
            }
        }
        // Deploy order must be acyclic; waves() reports the cycle.
        self.waves()?;
        Ok(())
    }

    /// Group deploy steps into waves. A step that references another step's
    /// name lands in a later wave than that step.
    pub fn waves(&self) -> Result<Vec<Vec<&DeployStep>>> {
        let declared: BTreeSet<&str> = self.deploy.iter().map(|s| s.name.as_str()).collect();
        let mut done: BTreeSet<&str> = BTreeSet::new();
        let mut remaining: Vec<&DeployStep> = self.deploy.iter().collect();
        let mut waves = Vec::new();
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&DeployStep>, Vec<&DeployStep>) =
                remaining.into_iter().partition(|step| {
                    let mut refs = BTreeSet::new();
                    step.args.iter().for_each(|a| a.referenced_symbols(&mut refs));
                    refs.iter()
                        .all(|r| !declared.contains(r.as_str()) || done.contains(r.as_str()))
                });
            if ready.is_empty() {
                let names: Vec<&str> = blocked.iter().map(|s| s.name.as_str()).collect();
                bail!("deploy steps reference each other in a cycle: {}", names.join(", "));
            }
            done.extend(ready.iter().map(|s| s.name.as_str()));
            waves.push(ready);
            remaining = blocked;
        }
        Ok(waves)
    }

    pub fn descriptor(&self) -> ProposalDescriptor {
        ProposalDescriptor {
            title: self.title.clone(),
            rationale: self.rationale.clone(),
            commands: self.commands.clone(),
        }
    }

    /// Build a runnable proposal named `name`.
    pub fn into_proposal(self, name: impl Into<String>) -> Proposal {
        let descriptor = self.descriptor();
        Proposal::new(name, descriptor).with_hooks(DeclarativeHooks { file: self })
    }
}

// ============================================================================
// Interpreter
// ============================================================================

fn resolve_args(args: &[Arg], registry: &AddressRegistry) -> Result<Vec<Value>> {
    Ok(args
        .iter()
        .map(|arg| arg.resolve(registry))
        .collect::<Result<Vec<_>, _>>()?)
}

/// Runs the steps of a [`ProposalFile`].
#[derive(Debug, Clone)]
pub struct DeclarativeHooks {
    file: ProposalFile,
}

impl DeclarativeHooks {
    async fn run_steps(&self, ctx: &PhaseContext<'_>, steps: &[Step]) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            self.run_step(ctx, step)
                .await
                .with_context(|| format!("step #{}", index))?;
        }
        Ok(())
    }

    async fn run_step(&self, ctx: &PhaseContext<'_>, step: &Step) -> Result<()> {
        let harness = ctx.harness;
        match step {
            Step::Fund { account, amount } => {
                let account = account.resolve(ctx.registry)?;
                harness.actors.fund(account, *amount).await?;
            }
            Step::Call {
                from,
                target,
                method,
                args,
                value,
            } => {
                let from = from.resolve(ctx.registry)?;
                let to = ctx.registry.resolve(target)?;
                let args = resolve_args(args, ctx.registry)?;
                let actors = &harness.actors;
                actors.ensure_funded(from, actors.call_cost(*value)).await?;
                let actor = actors.as_actor(from).await?;
                let outcome = actor.call(to, method, args, *value).await;
                actors.release(actor).await?;
                outcome.with_context(|| format!("calling {}.{}", target, method))?;
            }
            Step::Advance { seconds, blocks } => {
                if *seconds > 0 {
                    harness.clock.advance(Duration::from_secs(*seconds)).await?;
                }
                if *blocks > 0 {
                    harness.clock.advance_blocks(*blocks).await?;
                }
            }
            Step::Capture {
                name,
                target,
                method,
                args,
            } => {
                let args = resolve_args(args, ctx.registry)?;
                let values = ctx.read(target, &method.to_string(), args).await?;
                tracing::debug!(%name, values = %format_values(&values), "Captured");
                ctx.scratch.put(name.clone(), values);
            }
        }
        Ok(())
    }
}

fn as_single(values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.into_iter().next().unwrap_or(Value::List(Vec::new()))
    } else {
        Value::List(values)
    }
}

#[async_trait::async_trait]
impl ProposalHooks for DeclarativeHooks {
    async fn deploy(&self, ctx: &DeployContext<'_>) -> Result<NamedContracts> {
        let mut registry = ctx.registry.clone();
        let mut deployed = NamedContracts::new();
        for wave in self.file.waves()? {
            let mut pending = Vec::with_capacity(wave.len());
            for step in &wave {
                let args = resolve_args(&step.args, &registry)
                    .with_context(|| format!("deploying {}", step.name))?;
                pending.push(ctx.deployer.deploy(&step.artifact, args));
            }
            let receipts = futures::future::try_join_all(pending)
                .await
                .context("deploy wave failed")?;
            for (step, receipt) in wave.iter().zip(receipts) {
                tracing::info!(
                    proposal = %ctx.proposal,
                    name = %step.name,
                    address = %receipt.address,
                    "Deployed"
                );
                registry.bind(step.name.clone(), receipt.address);
                deployed = deployed.with(step.name.clone(), receipt.address, &step.artifact);
            }
        }
        Ok(deployed)
    }

    async fn setup(&self, ctx: &PhaseContext<'_>) -> Result<()> {
        self.run_steps(ctx, &self.file.setup).await
    }

    async fn teardown(&self, ctx: &PhaseContext<'_>) -> Result<()> {
        self.run_steps(ctx, &self.file.teardown).await
    }

    async fn validate(&self, ctx: &PhaseContext<'_>, verifier: &mut Verifier<'_>) -> Result<()> {
        for (index, check) in self.file.validate.iter().enumerate() {
            let label = check.label(index);
            match &check.kind {
                CheckKind::Read {
                    target,
                    method,
                    args,
                } => {
                    let args = resolve_args(args, ctx.registry)?;
                    let actual = as_single(ctx.read(target, &method.to_string(), args).await?);
                    let expected = match &check.expect {
                        Some(expect) => expect.resolve(ctx.registry)?,
                        None => bail!("{} has no expected value", label),
                    };
                    match (check.tolerance, actual.as_uint(), expected.as_uint()) {
                        (Some(tolerance), Some(a), Some(e)) => {
                            verifier.expect_approx(label, a, e, tolerance);
                        }
                        (Some(_), _, _) => verifier.fail(
                            label,
                            format!("tolerance needs uint values, got {} and {}", actual, expected),
                        ),
                        (None, _, _) => {
                            verifier.expect_value(label, &actual, &expected);
                        }
                    }
                }
                CheckKind::Unchanged {
                    capture,
                    target,
                    method,
                    args,
                } => {
                    let args = resolve_args(args, ctx.registry)?;
                    let current = as_single(ctx.read(target, &method.to_string(), args).await?);
                    match ctx.scratch.get(capture) {
                        Some(before) => {
                            verifier.expect_value(label, &current, &as_single(before));
                        }
                        None => verifier.fail(label, format!("nothing captured as '{}'", capture)),
                    }
                }
                CheckKind::Fail(message) => verifier.fail(label, message.clone()),
            }
        }
        Ok(())
    }
}
