use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use super::{
    TagFilter, TaskError, User, UserCatalog, UserClass, UserClassSet, UserClassSpec, UserContext,
    UserFactory,
};
use crate::config::types::{TaskActionConfig, UserClassConfig, WaitConfig};
use crate::error::ConfigError;

const DEFAULT_EXPECT_STATUS: u16 = 200;

#[derive(Debug, Clone, Copy)]
enum WaitSpec {
    Constant(Duration),
    Between { min_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone)]
enum TaskAction {
    Idle,
    Http {
        method: reqwest::Method,
        path: String,
        expect_status: u16,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone)]
struct TaskDef {
    name: String,
    weight: u32,
    tags: Vec<String>,
    action: TaskAction,
}

#[derive(Debug, Clone)]
struct ClassDef {
    spec: UserClassSpec,
    host: Option<String>,
    wait: WaitSpec,
    tags: Vec<String>,
    tasks: Vec<TaskDef>,
}

/// User classes defined in the `[[users]]` tables of a config file.
#[derive(Debug, Clone)]
pub struct ConfigCatalog {
    classes: Vec<ClassDef>,
}

impl ConfigCatalog {
    /// A catalog with no classes, for a worker that runs the master's.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            classes: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Validates the class definitions of a config file.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate names, zero weights, classes without
    /// tasks or malformed task definitions.
    pub fn from_config(users: &[UserClassConfig]) -> Result<Self, ConfigError> {
        if users.is_empty() {
            return Err(ConfigError::NoUserClasses);
        }
        let mut seen: HashSet<&str> = HashSet::with_capacity(users.len());
        let mut classes = Vec::with_capacity(users.len());
        for user in users {
            if !seen.insert(user.name.as_str()) {
                return Err(ConfigError::DuplicateUserClass {
                    name: user.name.clone(),
                });
            }
            classes.push(class_def(user)?);
        }
        Ok(Self { classes })
    }
}

fn class_def(user: &UserClassConfig) -> Result<ClassDef, ConfigError> {
    let weight = user.weight.unwrap_or(1);
    if weight == 0 {
        return Err(ConfigError::ZeroWeight {
            name: user.name.clone(),
        });
    }
    if user.tasks.is_empty() {
        return Err(ConfigError::NoTasks {
            name: user.name.clone(),
        });
    }
    let wait = match user.wait.as_ref() {
        None => WaitSpec::Constant(Duration::ZERO),
        Some(WaitConfig::Constant(value)) => WaitSpec::Constant(
            value
                .to_duration()
                .map_err(|err| ConfigError::InvalidField {
                    field: "wait",
                    source: err,
                })?,
        ),
        Some(WaitConfig::Between { min, max }) => {
            let min = min.to_duration().map_err(|err| ConfigError::InvalidField {
                field: "wait.min",
                source: err,
            })?;
            let max = max.to_duration().map_err(|err| ConfigError::InvalidField {
                field: "wait.max",
                source: err,
            })?;
            let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
            let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
            WaitSpec::Between {
                min_ms: min_ms.min(max_ms),
                max_ms: min_ms.max(max_ms),
            }
        }
    };

    let mut tasks = Vec::with_capacity(user.tasks.len());
    for task in &user.tasks {
        let action = match &task.action {
            TaskActionConfig::Idle => TaskAction::Idle,
            TaskActionConfig::Http {
                method,
                path,
                expect_status,
            } => {
                let method_name = method.as_deref().unwrap_or("GET").to_ascii_uppercase();
                let method = reqwest::Method::from_bytes(method_name.as_bytes()).map_err(
                    |_err| ConfigError::InvalidMethod {
                        name: user.name.clone(),
                        task: task.name.clone(),
                        method: method_name.clone(),
                    },
                )?;
                TaskAction::Http {
                    method,
                    path: path.clone(),
                    expect_status: expect_status.unwrap_or(DEFAULT_EXPECT_STATUS),
                }
            }
            TaskActionConfig::Error { message } => TaskAction::Error {
                message: message
                    .clone()
                    .unwrap_or_else(|| format!("task {} raised an error", task.name)),
            },
        };
        let weight = task.weight.unwrap_or(1);
        if weight == 0 {
            return Err(ConfigError::ZeroWeight {
                name: format!("{}.{}", user.name, task.name),
            });
        }
        tasks.push(TaskDef {
            name: task.name.clone(),
            weight,
            tags: task.tags.clone(),
            action,
        });
    }

    Ok(ClassDef {
        spec: UserClassSpec {
            name: user.name.clone(),
            weight,
            fixed_count: user.fixed_count,
        },
        host: user.host.clone(),
        wait,
        tags: user.tags.clone(),
        tasks,
    })
}

impl UserCatalog for ConfigCatalog {
    fn build(&self, tags: &TagFilter, host: Option<&str>) -> Result<UserClassSet, ConfigError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| ConfigError::HttpClient { source: err })?;
        let mut classes = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            let tasks: Vec<TaskDef> = class
                .tasks
                .iter()
                .filter(|task| {
                    let mut all_tags = class.tags.clone();
                    all_tags.extend(task.tags.iter().cloned());
                    tags.allows(&all_tags)
                })
                .cloned()
                .collect();
            if tasks.is_empty() {
                return Err(ConfigError::NoTasksAfterFiltering {
                    name: class.spec.name.clone(),
                });
            }

            let class_host = class.host.as_deref().or(host);
            let base = match class_host {
                Some(value) => Some(Url::parse(value).map_err(|err| ConfigError::InvalidHost {
                    value: value.to_owned(),
                    source: err,
                })?),
                None => None,
            };
            if base.is_none()
                && let Some(task) = tasks
                    .iter()
                    .find(|task| matches!(task.action, TaskAction::Http { .. }))
            {
                return Err(ConfigError::MissingHost {
                    name: class.spec.name.clone(),
                    task: task.name.clone(),
                });
            }

            let factory = ConfigUserFactory {
                tasks: Arc::from(tasks),
                wait: class.wait,
                base,
                client: client.clone(),
            };
            classes.push(
                UserClass::new(class.spec.clone(), Arc::new(factory)).with_host(class_host),
            );
        }
        UserClassSet::new(classes)
    }
}

struct ConfigUserFactory {
    tasks: Arc<[TaskDef]>,
    wait: WaitSpec,
    base: Option<Url>,
    client: reqwest::Client,
}

impl UserFactory for ConfigUserFactory {
    fn create(&self) -> Box<dyn User> {
        Box::new(ConfigUser {
            tasks: Arc::clone(&self.tasks),
            total_weight: self
                .tasks
                .iter()
                .fold(0u64, |acc, task| acc.saturating_add(u64::from(task.weight))),
            wait: self.wait,
            base: self.base.clone(),
            client: self.client.clone(),
            rng: StdRng::from_entropy(),
        })
    }
}

struct ConfigUser {
    tasks: Arc<[TaskDef]>,
    total_weight: u64,
    wait: WaitSpec,
    base: Option<Url>,
    client: reqwest::Client,
    rng: StdRng,
}

impl ConfigUser {
    fn pick_task(&mut self) -> Option<TaskDef> {
        if self.total_weight == 0 {
            return None;
        }
        let mut ticket = self.rng.gen_range(0..self.total_weight);
        for task in self.tasks.iter() {
            let weight = u64::from(task.weight);
            if ticket < weight {
                return Some(task.clone());
            }
            ticket = ticket.saturating_sub(weight);
        }
        self.tasks.last().cloned()
    }

    async fn run_http(
        &self,
        ctx: &UserContext,
        method: reqwest::Method,
        path: &str,
        expect_status: u16,
    ) -> Result<(), TaskError> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| TaskError::new("no host configured"))?;
        let url = base
            .join(path)
            .map_err(|err| TaskError::new(format!("invalid path '{}': {}", path, err)))?;
        let kind = method.as_str().to_owned();
        let started = Instant::now();
        let result = self.client.request(method, url).send().await;
        let latency = started.elapsed();
        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == expect_status {
                    ctx.record_success(&kind, path, latency);
                } else {
                    ctx.record_failure(
                        &kind,
                        path,
                        latency,
                        &format!("unexpected status {} (expected {})", status, expect_status),
                    );
                }
            }
            Err(err) => ctx.record_failure(&kind, path, latency, &err.to_string()),
        }
        Ok(())
    }
}

#[async_trait]
impl User for ConfigUser {
    async fn run_task(&mut self, ctx: &UserContext) -> Result<(), TaskError> {
        let Some(task) = self.pick_task() else {
            return Ok(());
        };
        match task.action {
            TaskAction::Idle => {
                ctx.record_success("task", &task.name, Duration::ZERO);
                Ok(())
            }
            TaskAction::Http {
                method,
                path,
                expect_status,
            } => self.run_http(ctx, method, &path, expect_status).await,
            TaskAction::Error { message } => Err(TaskError::new(message)),
        }
    }

    fn wait_time(&mut self) -> Duration {
        match self.wait {
            WaitSpec::Constant(duration) => duration,
            WaitSpec::Between { min_ms, max_ms } => {
                Duration::from_millis(self.rng.gen_range(min_ms..=max_ms))
            }
        }
    }
}
