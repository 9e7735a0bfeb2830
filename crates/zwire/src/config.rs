use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use zwire_driver::DriverConfig;

use crate::exit::{io_error, CliError, CliResult, USAGE};

/// Driver settings read from `--config FILE` (JSON).
///
/// Every field is optional; command-line flags win over the file.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub baud_rate: Option<u32>,
    pub ack_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_delay_step_ms: Option<u64>,
    pub reopen_attempts: Option<u32>,
    pub reopen_delay_ms: Option<u64>,
    pub checksum_failure_limit: Option<u32>,
    pub startup_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        Self::parse(&text)
            .map_err(|err| CliError::new(USAGE, format!("{}: {err}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn apply(&self, config: &mut DriverConfig) {
        let wire = &mut config.coordinator;
        if let Some(ms) = self.ack_timeout_ms {
            wire.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.max_attempts {
            wire.max_attempts = attempts;
        }
        if let Some(ms) = self.retry_base_delay_ms {
            wire.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry_delay_step_ms {
            wire.retry_delay_step = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.reopen_attempts {
            wire.reopen_attempts = attempts;
        }
        if let Some(ms) = self.reopen_delay_ms {
            wire.reopen_delay = Duration::from_millis(ms);
        }
        if let Some(limit) = self.checksum_failure_limit {
            wire.checksum_failure_limit = limit;
        }
        if let Some(ms) = self.startup_timeout_ms {
            config.startup_timeout = Duration::from_millis(ms);
        }
    }
}

/// Parse `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
