//! User classes: the specs the runner distributes and the units it executes.
mod config_user;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::ConfigError;
use crate::stats::{RequestRecord, StatsRecorder};

pub use config_user::ConfigCatalog;

/// Name, relative weight and optional fixed instance count of one user class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClassSpec {
    pub name: String,
    pub weight: u32,
    pub fixed_count: Option<u64>,
}

impl UserClassSpec {
    #[must_use]
    pub fn weighted(name: &str, weight: u32) -> Self {
        Self {
            name: name.to_owned(),
            weight,
            fixed_count: None,
        }
    }

    #[must_use]
    pub fn fixed(name: &str, fixed_count: u64) -> Self {
        Self {
            name: name.to_owned(),
            weight: 1,
            fixed_count: Some(fixed_count),
        }
    }
}

/// Error raised by a task body. Contained per unit and counted as a failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
}

impl TaskError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Per-unit view of the run handed to every task invocation.
#[derive(Debug, Clone)]
pub struct UserContext {
    class_name: Arc<str>,
    unit_id: u64,
    worker_index: Option<u64>,
    host: Option<Arc<str>>,
    recorder: StatsRecorder,
}

impl UserContext {
    #[must_use]
    pub fn new(
        class_name: Arc<str>,
        unit_id: u64,
        worker_index: Option<u64>,
        host: Option<Arc<str>>,
        recorder: StatsRecorder,
    ) -> Self {
        Self {
            class_name,
            unit_id,
            worker_index,
            host,
            recorder,
        }
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub const fn unit_id(&self) -> u64 {
        self.unit_id
    }

    /// Index the master assigned to this worker; `None` when running locally.
    #[must_use]
    pub const fn worker_index(&self) -> Option<u64> {
        self.worker_index
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn record(&self, record: RequestRecord) {
        self.recorder.record(record);
    }

    pub fn record_success(&self, kind: &str, name: &str, latency: Duration) {
        self.recorder.record(RequestRecord::success(kind, name, latency));
    }

    pub fn record_failure(&self, kind: &str, name: &str, latency: Duration, error: &str) {
        self.recorder
            .record(RequestRecord::failure(kind, name, latency, error));
    }
}

/// One simulated user. Each running unit owns exactly one instance.
#[async_trait]
pub trait User: Send {
    /// Runs once before the first task.
    ///
    /// # Errors
    ///
    /// An error is counted as a failure and the unit is restarted.
    async fn on_start(&mut self, _ctx: &UserContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Runs one task iteration.
    ///
    /// # Errors
    ///
    /// An error is counted as a failure and the unit is restarted.
    async fn run_task(&mut self, ctx: &UserContext) -> Result<(), TaskError>;

    /// Pause between two task iterations.
    fn wait_time(&mut self) -> Duration;

    async fn on_stop(&mut self, _ctx: &UserContext) {}
}

pub trait UserFactory: Send + Sync {
    fn create(&self) -> Box<dyn User>;
}

/// A class description together with the factory that creates its users.
#[derive(Clone)]
pub struct UserClass {
    spec: UserClassSpec,
    host: Option<Arc<str>>,
    factory: Arc<dyn UserFactory>,
}

impl std::fmt::Debug for UserClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserClass")
            .field("spec", &self.spec)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl UserClass {
    #[must_use]
    pub fn new(spec: UserClassSpec, factory: Arc<dyn UserFactory>) -> Self {
        Self {
            spec,
            host: None,
            factory,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: Option<&str>) -> Self {
        self.host = host.map(Arc::from);
        self
    }

    #[must_use]
    pub const fn spec(&self) -> &UserClassSpec {
        &self.spec
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn host(&self) -> Option<&Arc<str>> {
        self.host.as_ref()
    }

    #[must_use]
    pub fn create(&self) -> Box<dyn User> {
        self.factory.create()
    }
}

/// Ordered, name-unique set of user classes fixed for the duration of a run.
#[derive(Debug, Clone)]
pub struct UserClassSet {
    classes: Vec<UserClass>,
}

impl UserClassSet {
    /// Validates and wraps the classes in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty set, a duplicated name or a zero weight.
    pub fn new(classes: Vec<UserClass>) -> Result<Self, ConfigError> {
        if classes.is_empty() {
            return Err(ConfigError::NoUserClasses);
        }
        let mut seen: HashSet<&str> = HashSet::with_capacity(classes.len());
        for class in &classes {
            if !seen.insert(class.name()) {
                return Err(ConfigError::DuplicateUserClass {
                    name: class.name().to_owned(),
                });
            }
            if class.spec.weight == 0 {
                return Err(ConfigError::ZeroWeight {
                    name: class.name().to_owned(),
                });
            }
        }
        Ok(Self { classes })
    }

    /// A set with no classes yet; only a worker waiting for the master's
    /// definitions starts from one.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            classes: Vec::new(),
        }
    }

    /// Keeps only the named classes, preserving declaration order.
    ///
    /// An empty selection keeps every class.
    ///
    /// # Errors
    ///
    /// Returns an error naming every requested class that does not exist.
    pub fn select(self, names: &[String]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Ok(self);
        }
        let unknown: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| self.get(name).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownUserClasses {
                names: unknown.join(", "),
            });
        }
        let classes = self
            .classes
            .into_iter()
            .filter(|class| names.iter().any(|name| name == class.name()))
            .collect();
        Self::new(classes)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UserClass> {
        self.classes.iter().find(|class| class.name() == name)
    }

    #[must_use]
    pub fn specs(&self) -> Vec<UserClassSpec> {
        self.classes.iter().map(|class| class.spec.clone()).collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.classes
            .iter()
            .map(|class| class.name().to_owned())
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UserClass> {
        self.classes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Task tag selection (`--tags` / `--exclude-tags`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl TagFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    #[must_use]
    pub fn allows(&self, tags: &[String]) -> bool {
        let included =
            self.include.is_empty() || tags.iter().any(|tag| self.include.contains(tag));
        let excluded = tags.iter().any(|tag| self.exclude.contains(tag));
        included && !excluded
    }
}

/// Source of user classes, rebuilt when a run asks for a different tag filter.
pub trait UserCatalog: Send + Sync {
    /// Builds the class set for the given filter and default host.
    ///
    /// # Errors
    ///
    /// Returns an error when filtering leaves a class without tasks or the
    /// classes are otherwise unusable.
    fn build(&self, tags: &TagFilter, host: Option<&str>) -> Result<UserClassSet, ConfigError>;
}
