//! Integration tests for proposal-sandbox-core.
//!
//! These tests drive whole proposals through the coordinator against the
//! local fork.

use std::sync::Arc;

use anyhow::anyhow;
use proposal_sandbox_core::command::{Arg, Command, ProposalDescriptor, RegistryEffect};
use proposal_sandbox_core::config::SandboxPlan;
use proposal_sandbox_core::coordinator::{CoordinatorSettings, EnvironmentCoordinator};
use proposal_sandbox_core::events::{EventSink, LifecycleEvent, NullSink, RecordingSink};
use proposal_sandbox_core::fork::genesis::LiveChain;
use proposal_sandbox_core::fork::{Fork, ForkProvider, LiveChainSpec, LocalForkProvider};
use proposal_sandbox_core::governance::GovernanceSettings;
use proposal_sandbox_core::lifecycle::{
    DeployContext, ExecutionRoute, PhaseContext, PlannedProposal, Proposal, ProposalHooks,
    ProposalSchedule,
};
use proposal_sandbox_core::registry::NamedContracts;
use proposal_sandbox_core::verify::{approx_equal, Verifier};
use proposal_sandbox_core::{Phase, SandboxError};
use proposal_sandbox_types::{Address, MethodSignature, Value};

const CHAIN: &str = r#"
block: 100
timestamp: 1700000000
gas_fee: 1
operators: ["0xd0"]
labels:
  executor: "0xdead"
  proposer: "0xa1"
accounts:
  - { address: "0xd0", balance: "1_000_000" }
contracts:
  - { name: treasury, artifact: vault, deployer: "0xd0", args: [{ symbol: executor }] }
  - { name: log, artifact: recorder, deployer: "0xd0" }
  - name: governor
    artifact: governor
    deployer: "0xd0"
    args:
      - { uint: 1 }
      - { uint: 5 }
      - { uint: 2 }
      - { uint: 3600 }
      - { list: [{ address: "0xa1" }, { address: "0xa2" }] }
      - { list: [{ uint: 1 }, { uint: 1 }] }
  - { name: gov_vault, artifact: vault, deployer: "0xd0", args: [{ symbol: governor }] }
checkpoints: [90]
"#;

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn sig(raw: &str) -> MethodSignature {
    MethodSignature::parse(raw).unwrap()
}

fn chain() -> LiveChain {
    serde_yaml::from_str::<LiveChainSpec>(CHAIN)
        .unwrap()
        .build()
        .unwrap()
}

fn direct() -> ExecutionRoute {
    ExecutionRoute::Direct {
        executor: addr(0xdead),
    }
}

fn governance() -> ExecutionRoute {
    ExecutionRoute::Governance(GovernanceSettings {
        governor: "governor".into(),
        proposer: addr(0xa1),
        voters: vec![addr(0xa1), addr(0xa2)],
    })
}

fn make_coordinator(
    route: ExecutionRoute,
    events: Arc<dyn EventSink>,
) -> (EnvironmentCoordinator, Arc<LocalForkProvider>) {
    let chain = chain();
    let provider = Arc::new(chain.provider);
    let settings = CoordinatorSettings {
        reference: chain.head,
        route,
        base_registry: chain.registry,
        base_contracts: chain.contracts,
    };
    (
        EnvironmentCoordinator::new(provider.clone(), settings, events),
        provider,
    )
}

/// Deploys one contract and returns it under `name`.
struct DeployOne {
    name: &'static str,
    artifact: &'static str,
    /// Constructor argument symbols.
    args: Vec<&'static str>,
}

#[async_trait::async_trait]
impl ProposalHooks for DeployOne {
    async fn deploy(&self, ctx: &DeployContext<'_>) -> anyhow::Result<NamedContracts> {
        let args = self
            .args
            .iter()
            .map(|s| ctx.resolve(s).map(Value::Address))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let receipt = ctx.deployer.deploy(self.artifact, args).await?;
        Ok(NamedContracts::new().with(self.name, receipt.address, self.artifact))
    }
}

fn p1() -> Proposal {
    Proposal::new("p1", ProposalDescriptor::new("Deploy vault")).with_hooks(DeployOne {
        name: "vault",
        artifact: "vault",
        args: vec!["executor"],
    })
}

fn p2() -> Proposal {
    Proposal::new(
        "p2",
        ProposalDescriptor::new("Raise vault cap").with_command(
            Command::parse("vault", "setCap(uint256)")
                .unwrap()
                .with_args(vec![Arg::from(1000u128)])
                .describe("Set cap to 1000"),
        ),
    )
}

fn record(marker: &str) -> Command {
    Command::parse("log", "record(string)")
        .unwrap()
        .with_args(vec![Arg::from(marker)])
        .describe(format!("record {}", marker))
}

async fn markers(fork: &dyn Fork, log: Address) -> Vec<Value> {
    match fork.view(log, &sig("markers()"), &[]).await.unwrap().as_slice() {
        [Value::List(items)] => items.clone(),
        other => panic!("unexpected markers() result {:?}", other),
    }
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let history = vec![PlannedProposal::new(p1()), PlannedProposal::new(p2())];

    let first = coordinator.load_environment(&history, false).await.unwrap();
    let second = coordinator.load_environment(&history, false).await.unwrap();
    assert_eq!(first.registry, second.registry);
    assert_eq!(first.contracts, second.contracts);
    assert_eq!(
        first.lease.block().await.unwrap(),
        second.lease.block().await.unwrap()
    );
}

#[tokio::test]
async fn test_replayed_cap_change_reads_back() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let only_p1 = coordinator
        .load_environment(&[PlannedProposal::new(p1())], false)
        .await
        .unwrap();
    let p1_vault = only_p1.registry.resolve("vault").unwrap();
    drop(only_p1);

    let history = vec![PlannedProposal::new(p1()), PlannedProposal::new(p2())];
    let env = coordinator.load_environment(&history, false).await.unwrap();
    let vault = env.registry.resolve("vault").unwrap();
    assert_eq!(vault, p1_vault);
    assert_eq!(env.history[0].new_symbols, vec!["vault".to_string()]);
    assert_eq!(env.contracts.address("vault").unwrap(), vault);
    assert_eq!(
        env.lease.view(vault, &sig("cap()"), &[]).await.unwrap(),
        vec![Value::Uint(1000)]
    );
}

#[tokio::test]
async fn test_replay_runs_only_deploy_and_run() {
    let recorder = RecordingSink::default();
    let (coordinator, _) = make_coordinator(direct(), Arc::new(recorder.clone()));
    let schedule = ProposalSchedule::new(vec![PlannedProposal::new(p1())]).with_current(p2());
    let report = coordinator.run(&schedule).await.unwrap();

    assert_eq!(report.history.len(), 1);
    assert_eq!(
        recorder.completed_phases(),
        vec![
            ("p1".to_string(), Phase::Deploy),
            ("p1".to_string(), Phase::Run),
            ("p2".to_string(), Phase::Deploy),
            ("p2".to_string(), Phase::Setup),
            ("p2".to_string(), Phase::Run),
            ("p2".to_string(), Phase::Teardown),
            ("p2".to_string(), Phase::Validate),
        ]
    );
    let current = report.current.unwrap();
    assert_eq!(current.commands.len(), 1);
    assert_eq!(current.commands[0].description, "Set cap to 1000");
}

struct DeployWidget;

#[async_trait::async_trait]
impl ProposalHooks for DeployWidget {
    async fn deploy(&self, ctx: &DeployContext<'_>) -> anyhow::Result<NamedContracts> {
        let receipt = ctx.deployer.deploy("recorder", Vec::new()).await?;
        Ok(NamedContracts::new().with("widgetA", receipt.address, "recorder"))
    }
}

fn record_symbol(symbol: &'static str) -> Command {
    Command::parse("log", "record(string)")
        .unwrap()
        .with_resolver(move |registry| {
            Ok(vec![Value::String(registry.resolve(symbol)?.to_string())])
        })
}

#[tokio::test]
async fn test_deployed_symbol_resolves_in_later_command() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "widgets",
        ProposalDescriptor::new("Widgets")
            .with_command(record("first"))
            .with_command(record_symbol("widgetA")),
    )
    .with_hooks(DeployWidget);

    let env = coordinator
        .load_environment(&[PlannedProposal::new(proposal)], false)
        .await
        .unwrap();
    let widget = env.registry.resolve("widgetA").unwrap();
    let log = env.registry.resolve("log").unwrap();
    assert_eq!(
        markers(&*env.lease, log).await,
        vec![Value::from("first"), Value::String(widget.to_string())]
    );
}

#[tokio::test]
async fn test_unbound_symbol_in_arguments_fails() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "widgets",
        ProposalDescriptor::new("Widgets")
            .with_command(record("first"))
            .with_command(record_symbol("widgetB")),
    )
    .with_hooks(DeployWidget);

    let err = coordinator
        .run(&ProposalSchedule::default().with_current(proposal))
        .await
        .unwrap_err();
    match err {
        SandboxError::UnknownSymbol { symbol } => assert_eq!(symbol, "widgetB"),
        other => panic!("expected UnknownSymbol, got {}", other),
    }
}

#[tokio::test]
async fn test_commands_run_in_authored_order() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "markers",
        ProposalDescriptor::new("Three markers")
            .with_command(record("one"))
            .with_command(record("two"))
            .with_command(record("three")),
    );
    let route = direct();
    let recorder = RecordingSink::default();
    let mut env = coordinator.load_environment(&[], true).await.unwrap();
    let report = env
        .runner(&route, &recorder)
        .run_full(&PlannedProposal::new(proposal))
        .await
        .unwrap();

    let log = env.registry.resolve("log").unwrap();
    assert_eq!(
        markers(&*env.lease, log).await,
        vec![Value::from("one"), Value::from("two"), Value::from("three")]
    );
    let blocks: Vec<u64> = report.commands.iter().map(|c| c.block).collect();
    assert!(blocks.windows(2).all(|w| w[0] < w[1]), "{:?}", blocks);
    let dispatched: Vec<usize> = recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::CommandDispatched { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(dispatched, vec![0, 1, 2]);
}

/// Swaps the treasury's pending beneficiary in setup and restores it in
/// teardown.
struct BeneficiarySwap;

async fn beneficiary(ctx: &PhaseContext<'_>) -> anyhow::Result<Address> {
    ctx.read_address("treasury", "pendingBeneficiary()").await
}

fn stored(ctx: &PhaseContext<'_>, name: &str) -> anyhow::Result<Address> {
    match ctx.scratch.get(name).as_deref() {
        Some([Value::Address(a)]) => Ok(*a),
        other => Err(anyhow!("nothing usable stored as {}: {:?}", name, other)),
    }
}

#[async_trait::async_trait]
impl ProposalHooks for BeneficiarySwap {
    async fn setup(&self, ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        let original = beneficiary(ctx).await?;
        ctx.scratch.put("original", vec![Value::Address(original)]);
        let executor = ctx.resolve("executor")?;
        ctx.call_as(
            executor,
            "treasury",
            "setPendingBeneficiary(address)",
            vec![Value::Address(addr(0x42))],
        )
        .await?;
        Ok(())
    }

    async fn teardown(&self, ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        ctx.scratch
            .put("during", vec![Value::Address(beneficiary(ctx).await?)]);
        let original = stored(ctx, "original")?;
        let executor = ctx.resolve("executor")?;
        ctx.call_as(
            executor,
            "treasury",
            "setPendingBeneficiary(address)",
            vec![Value::Address(original)],
        )
        .await?;
        Ok(())
    }

    async fn validate(&self, ctx: &PhaseContext<'_>, verifier: &mut Verifier<'_>) -> anyhow::Result<()> {
        verifier.expect_eq("setup took effect", stored(ctx, "during")?, addr(0x42));
        verifier.expect_eq(
            "beneficiary restored",
            beneficiary(ctx).await?,
            stored(ctx, "original")?,
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_teardown_restores_what_setup_changed() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "swap",
        ProposalDescriptor::new("Swap beneficiary").with_command(record("during")),
    )
    .with_hooks(BeneficiarySwap);
    let report = coordinator
        .run(&ProposalSchedule::default().with_current(proposal))
        .await
        .unwrap();
    let assertions = report.current.unwrap().assertions;
    assert_eq!(assertions.len(), 2);
    assert!(assertions.iter().all(|a| a.passed));
}

#[test]
fn test_approx_equal_boundaries() {
    assert!(approx_equal(1000, 1000, 0));
    assert!(!approx_equal(1000, 1050, 40));
    assert!(approx_equal(1000, 1030, 40));
}

#[tokio::test]
async fn test_unknown_target_fails_before_dispatch() {
    let recorder = RecordingSink::default();
    let (coordinator, provider) = make_coordinator(direct(), Arc::new(recorder.clone()));
    let proposal = Proposal::new(
        "typo",
        ProposalDescriptor::new("Typo")
            .with_command(Command::parse("valt", "setCap(uint256)").unwrap().with_args(vec![Arg::from(1u128)])),
    );
    let err = coordinator
        .run(&ProposalSchedule::default().with_current(proposal))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::UnknownSymbol { ref symbol } if symbol == "valt"));
    assert!(!recorder
        .events()
        .iter()
        .any(|e| matches!(e, LifecycleEvent::CommandDispatched { .. })));
    assert_eq!(provider.live_forks(), 0);
}

#[tokio::test]
async fn test_failing_command_reports_index_and_reason() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "withdraw",
        ProposalDescriptor::new("Over-withdraw")
            .with_command(record("before"))
            .with_command(
                Command::parse("treasury", "withdraw(address,uint256)")
                    .unwrap()
                    .with_args(vec![Arg::from(addr(0x42)), Arg::from(5u128)])
                    .describe("Pay out"),
            )
            .with_command(record("never")),
    );
    let err = coordinator
        .run(&ProposalSchedule::default().with_current(proposal))
        .await
        .unwrap_err();
    match err {
        SandboxError::CommandExecution {
            index,
            description,
            reason,
            ..
        } => {
            assert_eq!(index, 1);
            assert_eq!(description, "Pay out");
            assert!(reason.contains("insufficient balance"), "{}", reason);
        }
        other => panic!("expected CommandExecution, got {}", other),
    }
}

#[tokio::test]
async fn test_historical_failure_is_a_replay_error() {
    let (coordinator, provider) = make_coordinator(direct(), Arc::new(NullSink));
    let broken = Proposal::new(
        "stale",
        ProposalDescriptor::new("Stale").with_command(
            Command::parse("treasury", "setCap(uint256)")
                .unwrap()
                .with_args(vec![Arg::from(1u128)]),
        ),
    );
    // Executed by someone other than the vault owner, so it reverts.
    let route = ExecutionRoute::Direct {
        executor: addr(0xbad),
    };
    let coordinator = EnvironmentCoordinator::new(
        provider.clone(),
        CoordinatorSettings {
            route,
            ..coordinator.settings().clone()
        },
        Arc::new(NullSink),
    );
    let schedule = ProposalSchedule::new(vec![PlannedProposal::new(broken)]).with_current(p2());
    let err = coordinator.run(&schedule).await.unwrap_err();
    assert!(err.is_fixture_error());
    match &err {
        SandboxError::Replay {
            proposal, position, ..
        } => {
            assert_eq!(proposal, "stale");
            assert_eq!(*position, 0);
        }
        other => panic!("expected Replay, got {}", other),
    }
    assert_eq!(err.root().kind(), "command_execution");
    assert_eq!(provider.live_forks(), 0);
}

struct Unfinished;

#[async_trait::async_trait]
impl ProposalHooks for Unfinished {
    async fn validate(&self, _ctx: &PhaseContext<'_>, verifier: &mut Verifier<'_>) -> anyhow::Result<()> {
        verifier.fail("validation", "not finished yet");
        Ok(())
    }
}

#[tokio::test]
async fn test_always_failing_validate() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal =
        Proposal::new("wip", ProposalDescriptor::new("Work in progress")).with_hooks(Unfinished);
    let err = coordinator
        .run(&ProposalSchedule::default().with_current(proposal))
        .await
        .unwrap_err();
    match err {
        SandboxError::AssertionFailure {
            proposal,
            failures,
            interrupted,
        } => {
            assert_eq!(proposal, "wip");
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].actual, "not finished yet");
            assert!(interrupted.is_none());
        }
        other => panic!("expected AssertionFailure, got {}", other),
    }
}

/// Records a failing check, then errors out on an unbound symbol.
struct FailsThenBails;

#[async_trait::async_trait]
impl ProposalHooks for FailsThenBails {
    async fn validate(&self, ctx: &PhaseContext<'_>, verifier: &mut Verifier<'_>) -> anyhow::Result<()> {
        verifier.expect_eq("cap", 1u64, 2u64);
        ctx.resolve("ghost")?;
        Ok(())
    }
}

#[tokio::test]
async fn test_validate_error_keeps_recorded_failures() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal =
        Proposal::new("bail", ProposalDescriptor::new("Bails early")).with_hooks(FailsThenBails);
    let err = coordinator
        .run(&ProposalSchedule::default().with_current(proposal))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("validation stopped early"), "{}", err);
    match err {
        SandboxError::AssertionFailure {
            failures,
            interrupted: Some(cause),
            ..
        } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].label, "cap");
            assert!(matches!(*cause, SandboxError::UnknownSymbol { ref symbol } if symbol == "ghost"));
        }
        other => panic!("expected AssertionFailure, got {}", other),
    }
}

#[tokio::test]
async fn test_governance_route_executes_commands() {
    let recorder = RecordingSink::default();
    let (coordinator, provider) = make_coordinator(governance(), Arc::new(recorder.clone()));
    let proposal = Proposal::new(
        "gov",
        ProposalDescriptor::new("Cap through governance")
            .with_command(
                Command::parse("gov_vault", "setCap(uint256)")
                    .unwrap()
                    .with_args(vec![Arg::from(5000u128)]),
            )
            .with_command(record("governed")),
    );
    let route = governance();
    let mut env = coordinator.load_environment(&[], true).await.unwrap();
    let report = env
        .runner(&route, &recorder)
        .run_full(&PlannedProposal::new(proposal))
        .await
        .unwrap();

    let vault = env.registry.resolve("gov_vault").unwrap();
    assert_eq!(
        env.lease.view(vault, &sig("cap()"), &[]).await.unwrap(),
        vec![Value::Uint(5000)]
    );
    let governor = env.registry.resolve("governor").unwrap();
    assert_eq!(
        env.lease
            .view(governor, &sig("state(uint256)"), &[Value::Uint(0)])
            .await
            .unwrap(),
        vec![Value::Uint(5)]
    );
    assert_eq!(report.commands.len(), 2);
    assert_eq!(report.commands[0].block, report.commands[1].block);
    let steps = recorder
        .events()
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::GovernanceStep { .. }))
        .count();
    // propose, two votes, queue, execute
    assert_eq!(steps, 5);
    drop(env);
    assert_eq!(provider.live_forks(), 0);
}

#[tokio::test]
async fn test_governance_failure_names_the_action() {
    let (coordinator, _) = make_coordinator(governance(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "gov",
        ProposalDescriptor::new("Half allowed")
            .with_command(
                Command::parse("gov_vault", "setCap(uint256)")
                    .unwrap()
                    .with_args(vec![Arg::from(5000u128)]),
            )
            .with_command(
                Command::parse("treasury", "setCap(uint256)")
                    .unwrap()
                    .with_args(vec![Arg::from(1u128)])
                    .describe("Governor does not own the treasury"),
            ),
    );
    let err = coordinator
        .run(&ProposalSchedule::default().with_current(proposal))
        .await
        .unwrap_err();
    match err {
        SandboxError::CommandExecution {
            index,
            description,
            reason,
            ..
        } => {
            assert_eq!(index, 1);
            assert_eq!(description, "Governor does not own the treasury");
            assert!(reason.contains("only owner"), "{}", reason);
        }
        other => panic!("expected CommandExecution, got {}", other),
    }
}

fn rebind(symbol: &str, source: &str) -> RegistryEffect {
    RegistryEffect::Rebind {
        symbol: symbol.to_string(),
        source: source.to_string(),
    }
}

fn set_cap(target: &str, cap: u128) -> Command {
    Command::parse(target, "setCap(uint256)")
        .unwrap()
        .with_args(vec![Arg::from(cap)])
}

#[tokio::test]
async fn test_direct_rebind_targets_next_command() {
    let (coordinator, _) = make_coordinator(direct(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "alias",
        ProposalDescriptor::new("Alias the treasury")
            .with_command(record("alias").with_effect(rebind("active_vault", "treasury")))
            .with_command(set_cap("active_vault", 7)),
    );
    let route = direct();
    let mut env = coordinator.load_environment(&[], true).await.unwrap();
    assert!(env.registry.get("active_vault").is_none());
    let report = env
        .runner(&route, &NullSink)
        .run_full(&PlannedProposal::new(proposal))
        .await
        .unwrap();

    let treasury = env.registry.resolve("treasury").unwrap();
    assert_eq!(env.registry.resolve("active_vault").unwrap(), treasury);
    assert_eq!(report.commands[1].address, treasury);
    assert_eq!(
        env.lease.view(treasury, &sig("cap()"), &[]).await.unwrap(),
        vec![Value::Uint(7)]
    );
}

#[tokio::test]
async fn test_governance_rebind_commits_after_execute() {
    let (coordinator, _) = make_coordinator(governance(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "gov-alias",
        ProposalDescriptor::new("Alias the governed vault")
            .with_command(set_cap("gov_vault", 5000).with_effect(rebind("active_vault", "gov_vault")))
            .with_command(set_cap("active_vault", 6000)),
    );
    let route = governance();
    let mut env = coordinator.load_environment(&[], true).await.unwrap();
    let report = env
        .runner(&route, &NullSink)
        .run_full(&PlannedProposal::new(proposal))
        .await
        .unwrap();

    let vault = env.registry.resolve("gov_vault").unwrap();
    assert_eq!(env.registry.resolve("active_vault").unwrap(), vault);
    assert_eq!(report.commands[1].address, vault);
    assert_eq!(
        env.lease.view(vault, &sig("cap()"), &[]).await.unwrap(),
        vec![Value::Uint(6000)]
    );
}

#[tokio::test]
async fn test_governance_rebind_dropped_when_execute_reverts() {
    let (coordinator, _) = make_coordinator(governance(), Arc::new(NullSink));
    let proposal = Proposal::new(
        "gov-alias",
        ProposalDescriptor::new("Alias then fail")
            .with_command(record("alias").with_effect(rebind("active_vault", "gov_vault")))
            .with_command(set_cap("treasury", 1)),
    );
    let route = governance();
    let mut env = coordinator.load_environment(&[], true).await.unwrap();
    let err = env
        .runner(&route, &NullSink)
        .run_full(&PlannedProposal::new(proposal))
        .await
        .unwrap_err();

    assert!(matches!(err, SandboxError::CommandExecution { index: 1, .. }), "{}", err);
    assert!(env.registry.get("active_vault").is_none());
    let log = env.registry.resolve("log").unwrap();
    assert!(markers(&*env.lease, log).await.is_empty());
}

#[tokio::test]
async fn test_preview_resolves_without_executing() {
    let (coordinator, provider) = make_coordinator(direct(), Arc::new(NullSink));
    let schedule = ProposalSchedule::new(vec![PlannedProposal::new(p1())]).with_current(p2());
    let preview = coordinator.preview(&schedule, "p2").await.unwrap();
    assert_eq!(preview.replayed, vec!["p1".to_string()]);
    assert_eq!(preview.actions.len(), 1);
    assert_eq!(preview.actions[0].args, vec![Value::Uint(1000)]);
    assert!(preview.issues.is_empty(), "{:?}", preview.issues);
    assert!(coordinator.preview(&schedule, "p9").await.is_err());
    assert_eq!(provider.live_forks(), 0);
}

#[tokio::test]
async fn test_declarative_plan_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, body: &str| std::fs::write(dir.path().join(name), body).unwrap();
    write("chain.yaml", CHAIN);
    write(
        "p1.yaml",
        r#"
title: Deploy vault
deploy:
  - { name: vault, artifact: vault, args: [{ symbol: executor }] }
"#,
    );
    write(
        "p2.yaml",
        r#"
title: Raise vault cap
setup:
  - capture: { name: owner_before, target: vault, method: "owner()" }
  - fund: { account: executor, amount: 500 }
commands:
  - { target: vault, method: "setCap(uint256)", args: [{ uint: 1000 }], description: Set cap }
validate:
  - read: { target: vault, method: "cap()" }
    expect: { uint: 1030 }
    tolerance: 40
  - unchanged: { capture: owner_before, target: vault, method: "owner()" }
  - read: { target: vault, method: "owner()" }
    expect: { symbol: executor }
"#,
    );
    write(
        "proposals.yaml",
        r#"
version: 1
chain: chain.yaml
executor: "0xdead"
logging: false
proposals:
  - { name: p1, file: p1.yaml }
  - { name: p2, file: p2.yaml, affected_contracts: [vault], current: true }
"#,
    );

    let path = dir.path().join("proposals.yaml");
    let check = SandboxPlan::check(&path).unwrap();
    assert!(check.is_ok(), "{:?}", check.issues);
    assert_eq!(check.current.as_deref(), Some("p2"));

    let plan = SandboxPlan::load(&path).unwrap();
    let recorder = RecordingSink::default();
    let report = plan
        .coordinator(plan.config.event_sink(&recorder))
        .run(&plan.schedule)
        .await
        .unwrap();
    let current = report.current.unwrap();
    assert_eq!(current.assertions.len(), 3);
    assert!(current.assertions.iter().all(|a| a.passed));
    assert_eq!(current.assertions[0].tolerance.as_deref(), Some("40"));
    assert_eq!(plan.provider.live_forks(), 0);
}

#[tokio::test]
async fn test_sign_off_violation_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("chain.yaml"), CHAIN).unwrap();
    std::fs::write(
        dir.path().join("p.yaml"),
        "title: t\ncommands:\n  - { target: treasury, method: \"setCap(uint256)\", args: [{ uint: 1 }] }\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("proposals.yaml"),
        "version: 1\nchain: chain.yaml\nexecutor: \"0xdead\"\nproposals:\n  - { name: p, file: p.yaml, affected_contracts: [vault], current: true }\n",
    )
    .unwrap();
    let path = dir.path().join("proposals.yaml");
    let check = SandboxPlan::check(&path).unwrap();
    assert_eq!(check.issues.len(), 1);
    assert!(check.issues[0].contains("'treasury'"));
    let err = SandboxPlan::load(&path).err().unwrap();
    let root = err.downcast_ref::<SandboxError>().unwrap();
    assert_eq!(root.kind(), "config");
}
