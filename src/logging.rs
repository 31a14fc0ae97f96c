use std::str::FromStr;

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};
use regex::Regex;

use crate::config::DebugConfig;

const CRATE_TARGET: &str = "marklastread";

/// Builds an `env_logger` filter spec: the base level for everything and the
/// crate at `debug` when debugging is on.
pub fn filter_spec(cfg: &DebugConfig) -> Result<String> {
    let level = LevelFilter::from_str(cfg.level.trim())
        .with_context(|| format!("logging: invalid level {:?}", cfg.level))?;
    let mut spec = level.to_string().to_lowercase();
    if cfg.enabled {
        spec.push_str(&format!(",{CRATE_TARGET}=debug"));
    }
    Ok(spec)
}

/// The message filter for debug output, when debugging is on and one is set.
pub fn debug_filter(cfg: &DebugConfig) -> Result<Option<Regex>> {
    if !cfg.enabled {
        return Ok(None);
    }
    cfg.filter
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .map(|filter| {
            Regex::new(filter).with_context(|| format!("logging: invalid debug filter {filter:?}"))
        })
        .transpose()
}

/// Warnings and errors always pass; debug and trace output must match the
/// filter.
fn passes(level: Level, message: &str, filter: Option<&Regex>) -> bool {
    match filter {
        Some(filter) if level >= Level::Debug => filter.is_match(message),
        _ => true,
    }
}

struct DebugFiltered {
    inner: env_logger::Logger,
    filter: Option<Regex>,
}

impl Log for DebugFiltered {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        if self.filter.is_some()
            && !passes(record.level(), &record.args().to_string(), self.filter.as_ref())
        {
            return;
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the global logger. `RUST_LOG` wins over the configured levels.
pub fn init(cfg: &DebugConfig) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.trim().is_empty() => {
            builder.parse_filters(&spec);
        }
        _ => {
            builder.parse_filters(&filter_spec(cfg)?);
        }
    }
    let inner = builder.format_timestamp(None).format_target(true).build();
    let max_level = inner.filter();
    log::set_boxed_logger(Box::new(DebugFiltered {
        inner,
        filter: debug_filter(cfg)?,
    }))
    .context("logging: install logger")?;
    log::set_max_level(max_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_quiet() {
        let cfg = DebugConfig::default();
        assert_eq!(filter_spec(&cfg).unwrap(), "warn");
        assert!(debug_filter(&cfg).unwrap().is_none());
    }

    #[test]
    fn debug_enables_crate_and_filter() {
        let cfg = DebugConfig {
            enabled: true,
            level: "error".into(),
            filter: Some("scroll|item".into()),
        };
        assert_eq!(filter_spec(&cfg).unwrap(), "error,marklastread=debug");
        assert_eq!(debug_filter(&cfg).unwrap().unwrap().as_str(), "scroll|item");
    }

    #[test]
    fn filter_only_narrows_debug_output() {
        let filter = Regex::new("scroll").unwrap();
        assert!(passes(Level::Debug, "scroll: run 1 started", Some(&filter)));
        assert!(!passes(Level::Debug, "menu: added entry", Some(&filter)));
        assert!(!passes(Level::Trace, "menu: added entry", Some(&filter)));
        assert!(passes(Level::Warn, "controller: root not found", Some(&filter)));
        assert!(passes(Level::Error, "item 4: no permalink", Some(&filter)));
        assert!(passes(Level::Debug, "anything", None));
    }

    #[test]
    fn rejects_bad_input() {
        let bad_level = DebugConfig {
            level: "loud".into(),
            ..DebugConfig::default()
        };
        assert!(filter_spec(&bad_level).is_err());

        let bad_filter = DebugConfig {
            enabled: true,
            filter: Some("(".into()),
            ..DebugConfig::default()
        };
        assert!(debug_filter(&bad_filter).is_err());
    }
}
