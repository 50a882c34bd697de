//! Engine configuration: cpu count, engine/scheduler selection, scope
//! range, budgets and timeouts.
//!
//! Scheduler selection uses the string form `name(key=value, key=value)`,
//! e.g. `colored(max_iterations=3)` or `sweep(permute=true)`. The parsed
//! [`SchedulerSpec`] carries the name plus an [`OptionsMap`] with typed
//! getters; the scheduler registry in the execution layer interprets both.
//! All parse failures are [`ConfigError`]s and fatal at `start()`.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which engine implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineKind {
    /// Worker threads pull tasks from a scheduler until convergence.
    Async,
    /// Barriered rounds over all vertices.
    Synchronous,
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "async" => Ok(EngineKind::Async),
            "synchronous" | "sync" => Ok(EngineKind::Synchronous),
            other => Err(ConfigError::UnknownEngineType(other.to_string())),
        }
    }
}

/// Strength of the consistency window a scope holds, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeRange {
    /// No locks; the update function must not touch shared state.
    None,
    /// Read lock on the center vertex only.
    VertexRead,
    /// Write lock on the center vertex only.
    VertexWrite,
    /// Write lock on the center, read locks on all adjacent vertices.
    Edge,
    /// Write locks on the center and every adjacent vertex.
    Full,
}

impl FromStr for ScopeRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ScopeRange::None),
            "vertex_read" => Ok(ScopeRange::VertexRead),
            "vertex" | "vertex_write" => Ok(ScopeRange::VertexWrite),
            "edge" => Ok(ScopeRange::Edge),
            "full" => Ok(ScopeRange::Full),
            other => Err(ConfigError::UnknownScopeRange(other.to_string())),
        }
    }
}

/// Key=value options attached to a scheduler spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsMap {
    entries: HashMap<String, String>,
}

impl OptionsMap {
    /// Parses a comma-separated `key=value` list.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut entries = HashMap::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedSpec(s.to_string()))?;
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(OptionsMap { entries })
    }

    /// Raw string value for `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Integer value for `key`, if present.
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.typed(key, "integer", |v| v.parse::<u64>().ok())
    }

    /// Float value for `key`, if present.
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.typed(key, "float", |v| v.parse::<f64>().ok())
    }

    /// Boolean value for `key`, if present. Accepts true/false/1/0/yes/no.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.typed(key, "bool", |v| match v {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        })
    }

    fn typed<T>(
        &self,
        key: &str,
        expected: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(v) => parse(v).map(Some).ok_or_else(|| ConfigError::InvalidOption {
                key: key.to_string(),
                value: v.clone(),
                expected,
            }),
        }
    }
}

/// A scheduler name with its options, parsed from `name(key=value,...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSpec {
    pub name: String,
    pub options: OptionsMap,
}

impl SchedulerSpec {
    /// A spec with the given name and no options.
    pub fn named(name: &str) -> Self {
        SchedulerSpec {
            name: name.to_string(),
            options: OptionsMap::default(),
        }
    }
}

impl FromStr for SchedulerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('(') {
            None => {
                if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(ConfigError::MalformedSpec(s.to_string()));
                }
                Ok(SchedulerSpec::named(s))
            }
            Some((name, rest)) => {
                let args = rest
                    .strip_suffix(')')
                    .ok_or_else(|| ConfigError::MalformedSpec(s.to_string()))?;
                Ok(SchedulerSpec {
                    name: name.trim().to_string(),
                    options: OptionsMap::parse(args)?,
                })
            }
        }
    }
}

/// The knobs needed to build and run an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker threads.
    pub ncpus: usize,
    /// Engine implementation to use.
    pub engine: EngineKind,
    /// Scheduler selection.
    pub scheduler: SchedulerSpec,
    /// Scope range used when the caller does not specify one.
    pub default_scope: ScopeRange,
    /// Request pinning workers to cpus. Advisory; logged when unsupported.
    pub cpu_affinity: bool,
    /// Maximum number of tasks to execute; 0 means unlimited.
    pub task_budget: u64,
    /// Wall-clock limit for a run.
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ncpus: 2,
            engine: EngineKind::Async,
            scheduler: SchedulerSpec::named("fifo"),
            default_scope: ScopeRange::Edge,
            cpu_affinity: false,
            task_budget: 0,
            timeout: None,
        }
    }
}

impl EngineConfig {
    /// Sets the worker count.
    pub fn with_ncpus(mut self, ncpus: usize) -> Self {
        self.ncpus = ncpus.max(1);
        self
    }

    /// Parses and sets the engine type.
    pub fn with_engine_type(mut self, s: &str) -> Result<Self, ConfigError> {
        self.engine = s.parse()?;
        Ok(self)
    }

    /// Parses and sets the scheduler spec.
    pub fn with_scheduler(mut self, s: &str) -> Result<Self, ConfigError> {
        self.scheduler = s.parse()?;
        Ok(self)
    }

    /// Parses and sets the default scope range.
    pub fn with_scope(mut self, s: &str) -> Result<Self, ConfigError> {
        self.default_scope = s.parse()?;
        Ok(self)
    }

    /// Sets the task budget; 0 disables it.
    pub fn with_task_budget(mut self, budget: u64) -> Self {
        self.task_budget = budget;
        self
    }

    /// Sets the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_scheduler_name() {
        let spec: SchedulerSpec = "fifo".parse().unwrap();
        assert_eq!(spec.name, "fifo");
        assert_eq!(spec.options, OptionsMap::default());
    }

    #[test]
    fn parses_scheduler_with_options() {
        let spec: SchedulerSpec = "colored(max_iterations=3)".parse().unwrap();
        assert_eq!(spec.name, "colored");
        assert_eq!(spec.options.get_u64("max_iterations").unwrap(), Some(3));

        let spec: SchedulerSpec = "round_robin(max_iterations=2, start_vertex=5)".parse().unwrap();
        assert_eq!(spec.options.get_u64("max_iterations").unwrap(), Some(2));
        assert_eq!(spec.options.get_u64("start_vertex").unwrap(), Some(5));
    }

    #[test]
    fn parses_bool_options() {
        let spec: SchedulerSpec = "sweep(permute=true)".parse().unwrap();
        assert_eq!(spec.options.get_bool("permute").unwrap(), Some(true));
        let spec: SchedulerSpec = "sweep(permute=0)".parse().unwrap();
        assert_eq!(spec.options.get_bool("permute").unwrap(), Some(false));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(matches!(
            "colored(max_iterations=3".parse::<SchedulerSpec>(),
            Err(ConfigError::MalformedSpec(_))
        ));
        assert!(matches!(
            "fifo extra".parse::<SchedulerSpec>(),
            Err(ConfigError::MalformedSpec(_))
        ));
        assert!(matches!(
            "sweep(permute)".parse::<SchedulerSpec>(),
            Err(ConfigError::MalformedSpec(_))
        ));
    }

    #[test]
    fn rejects_bad_option_types() {
        let spec: SchedulerSpec = "colored(max_iterations=lots)".parse().unwrap();
        assert!(matches!(
            spec.options.get_u64("max_iterations"),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[test]
    fn scope_range_names_and_ordering() {
        assert_eq!("edge".parse::<ScopeRange>().unwrap(), ScopeRange::Edge);
        assert_eq!("vertex".parse::<ScopeRange>().unwrap(), ScopeRange::VertexWrite);
        assert!(ScopeRange::None < ScopeRange::VertexRead);
        assert!(ScopeRange::Edge < ScopeRange::Full);
        assert!(matches!(
            "galaxy".parse::<ScopeRange>(),
            Err(ConfigError::UnknownScopeRange(_))
        ));
    }

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::default()
            .with_ncpus(4)
            .with_engine_type("async")
            .unwrap()
            .with_scheduler("priority")
            .unwrap()
            .with_scope("full")
            .unwrap()
            .with_task_budget(100);
        assert_eq!(config.ncpus, 4);
        assert_eq!(config.engine, EngineKind::Async);
        assert_eq!(config.scheduler.name, "priority");
        assert_eq!(config.default_scope, ScopeRange::Full);
        assert_eq!(config.task_budget, 100);
    }
}
