use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::args::SpawnRate;
use crate::config::types::ShapeConfig;
use crate::error::ConfigError;

/// How often the active shape is consulted.
pub const SHAPE_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeTick {
    Target { users: u64, spawn_rate: SpawnRate },
    Stop,
}

/// Maps elapsed run time to the desired load.
pub trait LoadShape: Send {
    fn name(&self) -> &str;

    /// Whether `--run-time`, `--users` and `--spawn-rate` still apply.
    fn use_common_options(&self) -> bool {
        false
    }

    fn tick(&mut self, elapsed: Duration) -> ShapeTick;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stage {
    until: Duration,
    users: u64,
    spawn_rate: SpawnRate,
}

/// Piecewise-constant shape: each stage holds until its end time.
#[derive(Debug, Clone)]
pub struct StagesShape {
    name: String,
    use_common_options: bool,
    stages: Vec<Stage>,
}

impl StagesShape {
    /// # Errors
    ///
    /// Returns an error for a shape with no stages or an invalid stage value.
    pub fn from_config(config: &ShapeConfig) -> Result<Self, ConfigError> {
        if config.stages.is_empty() {
            return Err(ConfigError::ShapeWithoutStages {
                name: config.name.clone(),
            });
        }
        let mut stages = Vec::with_capacity(config.stages.len());
        for stage in &config.stages {
            let until = stage
                .until
                .to_duration()
                .map_err(|source| ConfigError::InvalidField {
                    field: "shapes.stages.until",
                    source,
                })?;
            let spawn_rate =
                stage
                    .spawn_rate
                    .to_spawn_rate()
                    .map_err(|source| ConfigError::InvalidField {
                        field: "shapes.stages.spawn_rate",
                        source,
                    })?;
            stages.push(Stage {
                until,
                users: stage.users,
                spawn_rate,
            });
        }
        stages.sort_by_key(|stage| stage.until);
        Ok(Self {
            name: config.name.clone(),
            use_common_options: config.use_common_options,
            stages,
        })
    }
}

impl LoadShape for StagesShape {
    fn name(&self) -> &str {
        &self.name
    }

    fn use_common_options(&self) -> bool {
        self.use_common_options
    }

    fn tick(&mut self, elapsed: Duration) -> ShapeTick {
        self.stages
            .iter()
            .find(|stage| elapsed < stage.until)
            .map_or(ShapeTick::Stop, |stage| ShapeTick::Target {
                users: stage.users,
                spawn_rate: stage.spawn_rate,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeUpdate {
    /// Same target as the last tick.
    Unchanged,
    Target { users: u64, spawn_rate: SpawnRate },
    Stop,
}

/// Turns shape ticks into target changes.
pub struct ShapeController {
    shape: Box<dyn LoadShape>,
    started_at: Option<Instant>,
    applied: Option<(u64, SpawnRate)>,
    stopped: bool,
}

impl std::fmt::Debug for ShapeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeController")
            .field("shape", &self.shape.name())
            .field("applied", &self.applied)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl ShapeController {
    #[must_use]
    pub fn new(shape: Box<dyn LoadShape>) -> Self {
        Self {
            shape,
            started_at: None,
            applied: None,
            stopped: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.shape.name()
    }

    #[must_use]
    pub fn use_common_options(&self) -> bool {
        self.shape.use_common_options()
    }

    pub fn start(&mut self, now: Instant) {
        info!("Shape test starting.");
        self.started_at = Some(now);
        self.applied = None;
        self.stopped = false;
    }

    /// Consults the shape once. A stop is reported a single time.
    pub fn tick(&mut self, now: Instant) -> ShapeUpdate {
        if self.stopped {
            return ShapeUpdate::Unchanged;
        }
        let started_at = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_duration_since(started_at);
        match self.shape.tick(elapsed) {
            ShapeTick::Stop => {
                info!("Shape test stopping");
                self.stopped = true;
                ShapeUpdate::Stop
            }
            ShapeTick::Target { users, spawn_rate } => {
                if self.applied == Some((users, spawn_rate)) {
                    return ShapeUpdate::Unchanged;
                }
                info!(
                    "Shape test updating to {} users at {} spawn rate",
                    users, spawn_rate
                );
                self.applied = Some((users, spawn_rate));
                ShapeUpdate::Target { users, spawn_rate }
            }
        }
    }
}

/// Options typed on the command line that a shape without common options ignores.
const SHAPE_OVERRIDDEN_OPTIONS: [&str; 3] = ["--run-time", "--users", "--spawn-rate"];

/// Warning lines for explicitly set options a shape will ignore.
#[must_use]
pub fn ignored_option_warnings(use_common_options: bool, explicit: &[&str]) -> Vec<String> {
    if use_common_options {
        return Vec::new();
    }
    let ignored: Vec<&str> = explicit
        .iter()
        .copied()
        .filter(|flag| SHAPE_OVERRIDDEN_OPTIONS.contains(flag))
        .collect();
    if ignored.is_empty() {
        return Vec::new();
    }
    vec![
        "--run-time, --users or --spawn-rate have no impact on LoadShapes unless the shape class sets use_common_options".to_owned(),
        format!("The following option(s) will be ignored: {}", ignored.join(", ")),
    ]
}
