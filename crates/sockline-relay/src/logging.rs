//! Log filtering and subscriber setup.
//!
//! Verbosity starts from a preset picked by CLI flags, is refined by
//! per-target overrides, and can be replaced wholesale by `RUST_LOG`.
//! Output is plain text or JSON.

use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format '{}', expected 'text' or 'json'", s)),
        }
    }
}

/// Verbosity tiers selected by CLI flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Startup, API, and connection lifecycle only
    #[default]
    Production,
    /// Adds hub fan-out activity
    Verbose,
    /// Full troubleshooting detail
    Debug,
    /// Everything, including per-frame noise
    Trace,
    /// Warnings and errors only
    Quiet,
}

/// Filtering and formatting choices assembled from the CLI.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Target-level pins that beat the preset, keyed by full target name.
    pub overrides: HashMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Assemble a config from parsed CLI flags. `--quiet` beats the other
    /// flags; otherwise the most verbose flag set applies.
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        };

        // Each override is "target=level"; several may share one flag,
        // comma-separated. Unparseable pairs are ignored.
        let overrides = log_overrides
            .iter()
            .flat_map(|raw| raw.split(','))
            .filter_map(|pair| {
                let (target, level) = pair.split_once('=')?;
                let level = parse_level(level.trim())?;
                Some((qualify_target(target.trim()), level))
            })
            .collect();

        Self {
            preset,
            overrides,
            format,
        }
    }

    /// Build the subscriber filter. An explicit `RUST_LOG` replaces the
    /// preset and overrides entirely.
    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(from_env) = EnvFilter::try_from_default_env() {
            return from_env;
        }

        let mut directives: Vec<String> = match self.preset {
            LogPreset::Production => vec![
                "sockline::startup=info".into(),
                "sockline::api=info".into(),
                "sockline::ws=info".into(),
                "sockline::hub=warn".into(),
                "tower_http=warn".into(),
            ],
            LogPreset::Verbose => vec![
                "sockline=info".into(),
                "sockline::hub=info".into(),
                "tower_http=info".into(),
            ],
            LogPreset::Debug => vec!["sockline=debug".into(), "tower_http=debug".into()],
            LogPreset::Trace => vec!["sockline=trace".into(), "tower_http=trace".into()],
            LogPreset::Quiet => vec!["sockline=warn".into(), "tower_http=error".into()],
        };

        for (target, level) in &self.overrides {
            directives.push(format!("{target}={level}"));
        }

        EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Prefix bare target names with the crate namespace. Full names and the
/// `tower_http` target pass through untouched.
fn qualify_target(target: &str) -> String {
    if target.starts_with("sockline::") || target == "tower_http" {
        target.to_string()
    } else {
        format!("sockline::{target}")
    }
}

/// Accept the usual level names, case-insensitive, plus "warning".
fn parse_level(s: &str) -> Option<Level> {
    if s.eq_ignore_ascii_case("warning") {
        return Some(Level::WARN);
    }
    s.parse().ok()
}

/// Install the global subscriber. Call once at startup.
pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
    }
}
