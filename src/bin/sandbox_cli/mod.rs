//! CLI subcommand implementations for proposal-sandbox

pub mod check;
pub mod output;
pub mod preview;
pub mod replay;
pub mod run;

use proposal_sandbox_core::SandboxError;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_FIXTURE: u8 = 3;

/// Exit status for a failed command. Broken history and broken configs get
/// their own codes so CI can tell them apart from a failing proposal.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SandboxError>() {
        Some(e) if e.is_fixture_error() => EXIT_FIXTURE,
        Some(SandboxError::Config { .. }) => EXIT_CONFIG,
        _ => EXIT_FAILURE,
    }
}
