//! Forward-only clock control for a fork.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::SandboxError;
use crate::fork::{BlockInfo, Fork};

#[derive(Clone)]
pub struct TimeController {
    fork: Arc<dyn Fork>,
}

impl TimeController {
    pub fn new(fork: Arc<dyn Fork>) -> Self {
        Self { fork }
    }

    pub async fn now(&self) -> Result<BlockInfo, SandboxError> {
        self.fork.block().await
    }

    /// Move the clock forward by `duration` and mine one block so the new
    /// timestamp is observable.
    pub async fn advance(&self, duration: Duration) -> Result<BlockInfo, SandboxError> {
        self.fork.increase_time(duration.as_secs()).await?;
        let head = self.fork.mine(1).await?;
        tracing::debug!(seconds = duration.as_secs(), block = head.number, "Advanced clock");
        Ok(head)
    }

    pub async fn advance_blocks(&self, blocks: u64) -> Result<BlockInfo, SandboxError> {
        self.fork.mine(blocks).await
    }

    /// Mine until the head is exactly `target`.
    pub async fn advance_to_block(&self, target: u64) -> Result<BlockInfo, SandboxError> {
        let head = self.now().await?;
        if target < head.number {
            return Err(SandboxError::ClockRegression {
                current: head.number,
                requested: target,
            });
        }
        self.fork.mine(target - head.number).await
    }

    /// Set the head timestamp to `target` without mining.
    pub async fn advance_to_timestamp(&self, target: u64) -> Result<BlockInfo, SandboxError> {
        let head = self.now().await?;
        if target < head.timestamp {
            return Err(SandboxError::ClockRegression {
                current: head.timestamp,
                requested: target,
            });
        }
        self.fork.increase_time(target - head.timestamp).await
    }
}
