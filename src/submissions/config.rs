//! Run configuration, read from an optional TOML file.

use anyhow::Context;
use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use serde_derive::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

/// Default time zone timestamps are rendered in.
pub const DEFAULT_TIMEZONE: &str = "Australia/Melbourne";
/// Default ledger timestamp format (day/month/year, no padding).
pub const DEFAULT_DATE_FORMAT: &str = "%-d/%-m/%Y %-H:%-M:%-S";
/// Default ledger path.
pub const DEFAULT_LEDGER: &str = "submissions_timestamps.csv";

/// Config object for a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// IANA time zone used for every rendered timestamp.
    pub timezone: String,
    /// `strftime` format of ledger timestamps.
    pub date_format: String,
    /// Ledger path used when `--file-timestamps` isn't given.
    pub ledger: PathBuf,
    /// Pacing between repositories.
    pub throttle: Throttle,
    /// Credentials for HTTPS remotes.
    pub credentials: CredentialsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_owned(),
            date_format: DEFAULT_DATE_FORMAT.to_owned(),
            ledger: PathBuf::from(DEFAULT_LEDGER),
            throttle: Throttle::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Pause for `pause_secs` after every `every` repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Throttle {
    /// Repositories processed between pauses. `0` disables pausing.
    pub every: usize,
    /// Length of each pause in seconds.
    pub pause_secs: u64,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            every: 10,
            pause_secs: 5,
        }
    }
}

impl Throttle {
    /// Whether a pause is due after `processed` of `total` repositories.
    #[must_use]
    pub const fn is_due(&self, processed: usize, total: usize) -> bool {
        self.every > 0 && self.pause_secs > 0 && processed < total && processed % self.every == 0
    }
}

///
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsConfig {
    /// File holding a GitHub token.
    pub token_file: Option<PathBuf>,
}

impl Config {
    /// Load and validate a config file.
    ///
    /// # Errors
    /// Will error if the file can't be read or parsed, or holds an unknown
    /// time zone or an invalid date format.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config_str = read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        let conf: Self = toml::from_str(&config_str)
            .with_context(|| format!("Could not parse config file {}", path.display()))?;
        conf.validate()?;
        Ok(conf)
    }

    /// Parse the configured time zone.
    ///
    /// # Errors
    /// Errors if the name isn't an IANA time zone.
    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| anyhow::anyhow!("Invalid time zone `{}`: {err}", self.timezone))
    }

    /// Check the values that can't be checked while deserializing.
    ///
    /// # Errors
    /// Errors on an unknown time zone or an invalid date format.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.timezone()?;
        if StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error)) {
            anyhow::bail!("Invalid date format `{}`", self.date_format);
        }
        Ok(())
    }
}
