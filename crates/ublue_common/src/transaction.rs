//! Wait for in-flight rpm-ostree transactions
//!
//! Running an update while another package transaction holds the sysroot is
//! unsafe, so the orchestrator blocks here before touching anything.

use crate::command::CommandRunner;
use crate::config::UpdateConfig;
use crate::deployment::SystemImage;
use crate::error::{Result, UpdateError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blocks until rpm-ostree reports no active transaction
pub struct TransactionWaiter<R> {
    image: SystemImage<R>,
    poll_interval: Duration,
}

impl<R: CommandRunner> TransactionWaiter<R> {
    pub fn new(runner: R, config: &UpdateConfig) -> Self {
        Self {
            image: SystemImage::new(runner, config),
            poll_interval: config.transaction.poll_interval(),
        }
    }

    /// Poll until quiesced. Returns the number of busy polls observed.
    ///
    /// Unreadable status output counts as idle; failure to run rpm-ostree at
    /// all is an error.
    pub fn wait_until_quiesced(&self) -> Result<u32> {
        let mut busy_polls = 0u32;
        loop {
            match self.image.status() {
                Ok(status) if status.transaction_active() => {
                    if busy_polls == 0 {
                        info!("Waiting for the active rpm-ostree transaction to finish");
                    }
                    busy_polls += 1;
                    thread::sleep(self.poll_interval);
                }
                Ok(_) => break,
                Err(e @ UpdateError::Command { .. }) => return Err(e),
                Err(e) => {
                    warn!("unreadable rpm-ostree status, assuming idle: {}", e);
                    break;
                }
            }
        }
        debug!(busy_polls, "no transaction in flight");
        Ok(busy_polls)
    }
}
