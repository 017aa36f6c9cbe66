//! Cooperative handling of user interrupts (Ctrl-C).
//!
//! A batch run checks the shared flag between repositories, between the steps
//! of a single synchronization, and from inside libgit2 transfer callbacks. A
//! set flag aborts the whole batch with [`Interrupted`]. A blocking network
//! call never looks at the flag, so a second Ctrl-C exits the process at once.

use derive_more::Display;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Process exit code after Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Error raised when the operator interrupts a run.
#[derive(Debug, Display)]
#[display(fmt = "interrupted by user")]
pub struct Interrupted;

impl std::error::Error for Interrupted {}

/// Shared interrupt flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Install a Ctrl-C handler that sets the returned flag. A second Ctrl-C
    /// exits with [`EXIT_INTERRUPTED`]; no ledger has been written by then.
    ///
    /// # Errors
    /// Errors if a signal handler has already been installed for the process.
    #[allow(clippy::exit)]
    pub fn install() -> anyhow::Result<Self> {
        let interrupt = Self::default();
        let handler = interrupt.clone();
        ctrlc::set_handler(move || {
            if handler.trigger() {
                tracing::warn!("Interrupted again; exiting");
                std::process::exit(EXIT_INTERRUPTED);
            }
            tracing::warn!("Stopping after the current step; press Ctrl-C again to exit now");
        })?;
        Ok(interrupt)
    }

    /// Mark the run as interrupted. Returns whether it already was.
    pub fn trigger(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    /// Whether the run has been interrupted.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return [`Interrupted`] if the flag is set.
    ///
    /// # Errors
    /// Errors when the run has been interrupted.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_set() {
            return Err(Interrupted.into());
        }
        Ok(())
    }
}
