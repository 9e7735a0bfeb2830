use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Crates whose events follow `--log-level`. Everything else stays at warn.
const ZWIRE_TARGETS: [&str; 4] = ["zwire", "zwire_driver", "zwire_transport", "zwire_frame"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Default filter: dependencies at warn, zwire crates at `level`.
fn default_directives(level: LogLevel) -> String {
    let mut directives = String::from("warn");
    for target in ZWIRE_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push('=');
        directives.push_str(level.directive());
    }
    directives
}

/// Install the stderr subscriber. `RUST_LOG`, when set, replaces the default
/// filter. Library crates only emit events.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_scopes_level_to_zwire_crates() {
        assert_eq!(
            default_directives(LogLevel::Debug),
            "warn,zwire=debug,zwire_driver=debug,zwire_transport=debug,zwire_frame=debug"
        );
    }

    #[test]
    fn default_filter_parses() {
        for level in [LogLevel::Error, LogLevel::Info, LogLevel::Trace] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }
}
