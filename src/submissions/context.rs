//! The run context: everything a run needs that used to be process-wide state.

use crate::submissions::config::{Config, Throttle};
use crate::utils::git::GitAuth;
use crate::utils::interrupt::Interrupt;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::time::{Duration, Instant};

/// Format of the timestamp used in backup file names.
const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
/// Longest a pause sleeps before looking at the interrupt flag again.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Values fixed for the duration of one run, passed to every component.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Time zone for rendered timestamps.
    pub timezone: Tz,
    /// When the run started.
    pub started_at: DateTime<Tz>,
    /// `strftime` format for ledger timestamps.
    pub date_format: String,
    /// Pacing between repositories.
    pub throttle: Throttle,
    /// Credentials and cancellation for git network operations.
    pub auth: GitAuth,
    /// Set when the operator interrupts the run.
    pub interrupt: Interrupt,
}

impl RunContext {
    /// Build the context from a validated config.
    ///
    /// # Errors
    /// Errors if the configured time zone is invalid.
    pub fn new(config: &Config, token: Option<String>, interrupt: Interrupt) -> anyhow::Result<Self> {
        config.validate()?;
        let timezone = config.timezone()?;
        Ok(Self {
            timezone,
            started_at: Utc::now().with_timezone(&timezone),
            date_format: config.date_format.clone(),
            throttle: config.throttle,
            auth: GitAuth::new(token, interrupt.clone()),
            interrupt,
        })
    }

    /// Render `time` in the run's time zone and ledger format.
    #[must_use]
    pub fn format_time(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&self.timezone)
            .format(&self.date_format)
            .to_string()
    }

    /// Run start as used in backup file names.
    #[must_use]
    pub fn stamp(&self) -> String {
        self.started_at.format(STAMP_FORMAT).to_string()
    }

    /// Sleep if the throttle asks for a pause after `processed` of `total`.
    /// An interrupt cuts the pause short.
    pub fn pace(&self, processed: usize, total: usize) {
        if !self.throttle.is_due(processed, total) {
            return;
        }
        tracing::info!(
            pause_secs = self.throttle.pause_secs,
            "Pausing after {processed} repositories"
        );
        let deadline = Instant::now() + Duration::from_secs(self.throttle.pause_secs);
        while !self.interrupt.is_set() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(PAUSE_SLICE));
        }
    }
}
