//! Invariant verification for the validate phase.
//!
//! A [`Verifier`] records every check it is asked to make instead of aborting
//! on the first failure, so a validate hook reports all broken invariants at
//! once. [`Verifier::finish`] turns the collected failures into a single
//! [`SandboxError::AssertionFailure`].

use std::fmt;

use serde::{Deserialize, Serialize};

use proposal_sandbox_types::Value;

use crate::errors::SandboxError;
use crate::events::{EventSink, LifecycleEvent};

/// `|actual - expected| <= tolerance`, without overflow.
pub fn approx_equal(actual: u128, expected: u128, tolerance: u128) -> bool {
    actual.abs_diff(expected) <= tolerance
}

/// Outcome of a single validation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionRecord {
    pub label: String,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<String>,
}

impl fmt::Display for AssertionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "ok" } else { "FAILED" };
        write!(
            f,
            "{} [{}]: expected {}, actual {}",
            self.label, status, self.expected, self.actual
        )?;
        if let Some(tolerance) = &self.tolerance {
            write!(f, " (tolerance {})", tolerance)?;
        }
        Ok(())
    }
}

/// Collects assertion outcomes for one proposal.
pub struct Verifier<'a> {
    proposal: String,
    records: Vec<AssertionRecord>,
    sink: Option<&'a dyn EventSink>,
}

impl<'a> Verifier<'a> {
    pub fn new(proposal: impl Into<String>) -> Self {
        Self {
            proposal: proposal.into(),
            records: Vec::new(),
            sink: None,
        }
    }

    /// Emit an [`LifecycleEvent::AssertionEvaluated`] for every check.
    pub fn with_sink(mut self, sink: &'a dyn EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    fn push(&mut self, record: AssertionRecord) -> bool {
        let passed = record.passed;
        if !passed {
            tracing::warn!(proposal = %self.proposal, "{}", record);
        } else {
            tracing::debug!(proposal = %self.proposal, "{}", record);
        }
        if let Some(sink) = self.sink {
            sink.emit(&LifecycleEvent::AssertionEvaluated {
                proposal: self.proposal.clone(),
                record: record.clone(),
            });
        }
        self.records.push(record);
        passed
    }

    /// Exact equality of any two displayable, comparable values.
    pub fn expect_eq<T>(&mut self, label: impl Into<String>, actual: T, expected: T) -> bool
    where
        T: PartialEq + fmt::Display,
    {
        self.push(AssertionRecord {
            label: label.into(),
            passed: actual == expected,
            expected: expected.to_string(),
            actual: actual.to_string(),
            tolerance: None,
        })
    }

    pub fn expect_value(&mut self, label: impl Into<String>, actual: &Value, expected: &Value) -> bool {
        self.expect_eq(label, actual, expected)
    }

    /// Absolute tolerance check; see [`approx_equal`].
    pub fn expect_approx(
        &mut self,
        label: impl Into<String>,
        actual: u128,
        expected: u128,
        tolerance: u128,
    ) -> bool {
        self.push(AssertionRecord {
            label: label.into(),
            passed: approx_equal(actual, expected, tolerance),
            expected: expected.to_string(),
            actual: actual.to_string(),
            tolerance: Some(tolerance.to_string()),
        })
    }

    /// Relative tolerance in basis points of `expected`.
    pub fn expect_within_bps(
        &mut self,
        label: impl Into<String>,
        actual: u128,
        expected: u128,
        bps: u32,
    ) -> bool {
        let tolerance = expected / 10_000 * u128::from(bps)
            + expected % 10_000 * u128::from(bps) / 10_000;
        self.push(AssertionRecord {
            label: label.into(),
            passed: approx_equal(actual, expected, tolerance),
            expected: expected.to_string(),
            actual: actual.to_string(),
            tolerance: Some(format!("{} ({} bps)", tolerance, bps)),
        })
    }

    pub fn expect_true(&mut self, label: impl Into<String>, condition: bool) -> bool {
        self.push(AssertionRecord {
            label: label.into(),
            passed: condition,
            expected: "true".to_string(),
            actual: condition.to_string(),
            tolerance: None,
        })
    }

    /// Unconditional failure, for checks that must never be reached.
    pub fn fail(&mut self, label: impl Into<String>, message: impl Into<String>) {
        self.push(AssertionRecord {
            label: label.into(),
            passed: false,
            expected: "unreachable".to_string(),
            actual: message.into(),
            tolerance: None,
        });
    }

    pub fn records(&self) -> &[AssertionRecord] {
        &self.records
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssertionRecord> {
        self.records.iter().filter(|r| !r.passed)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// All records on success, or every failure bundled into one error.
    pub fn finish(self) -> Result<Vec<AssertionRecord>, SandboxError> {
        if self.has_failures() {
            let failures = self.records.into_iter().filter(|r| !r.passed).collect();
            return Err(SandboxError::AssertionFailure {
                proposal: self.proposal,
                failures,
                interrupted: None,
            });
        }
        Ok(self.records)
    }

    /// Error for a validate hook that bailed out. Failures recorded before
    /// the hook errored are kept alongside the hook's error.
    pub fn interrupted_by(self, err: SandboxError) -> SandboxError {
        if !self.has_failures() {
            return err;
        }
        SandboxError::AssertionFailure {
            proposal: self.proposal,
            failures: self.records.into_iter().filter(|r| !r.passed).collect(),
            interrupted: Some(Box::new(err)),
        }
    }
}
