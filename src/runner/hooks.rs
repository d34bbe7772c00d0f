use std::sync::Arc;

use tracing::{debug, info};

use crate::config::types::HooksConfig;
use crate::error::RunnerError;
use crate::spawn::{ClassCounts, format_counts};

/// Which kind of node a runner is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Local,
    Master,
    Worker,
}

impl NodeRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeRole::Local => "local",
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    /// End the process with this code instead of starting the test.
    Exit { code: i32 },
}

/// Callbacks fired at fixed points of the run lifecycle.
pub trait RunHook: Send + Sync {
    /// Runs before any user is started.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the node.
    fn on_init(&self, _role: NodeRole) -> Result<(), RunnerError> {
        Ok(())
    }

    fn on_test_start(&self, _role: NodeRole) -> HookAction {
        HookAction::Continue
    }

    fn on_spawning_complete(&self, _role: NodeRole, _counts: &ClassCounts) {}

    fn on_stopping(&self, _role: NodeRole) {}

    /// May replace the exit code the node is about to use.
    fn on_quitting(&self, _role: NodeRole, _exit_code: i32) -> Option<i32> {
        None
    }
}

/// Ordered hook list; hooks fire in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: Vec<Arc<dyn RunHook>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("len", &self.hooks.len())
            .finish()
    }
}

impl Hooks {
    #[must_use]
    pub fn new(hooks: Vec<Arc<dyn RunHook>>) -> Self {
        Self { hooks }
    }

    pub fn push(&mut self, hook: Arc<dyn RunHook>) {
        self.hooks.push(hook);
    }

    /// # Errors
    ///
    /// Returns the first hook failure.
    pub fn init(&self, role: NodeRole) -> Result<(), RunnerError> {
        self.hooks.iter().try_for_each(|hook| hook.on_init(role))
    }

    /// # Errors
    ///
    /// Returns [`RunnerError::HookExit`] when a hook asks the node to exit.
    pub fn test_start(&self, role: NodeRole) -> Result<(), RunnerError> {
        for hook in &self.hooks {
            if let HookAction::Exit { code } = hook.on_test_start(role) {
                info!("test_start hook requested exit with code {}", code);
                return Err(RunnerError::HookExit {
                    hook: "test_start",
                    code,
                });
            }
        }
        Ok(())
    }

    pub fn spawning_complete(&self, role: NodeRole, counts: &ClassCounts) {
        debug!("Spawning complete on {}: {}", role.as_str(), format_counts(counts));
        for hook in &self.hooks {
            hook.on_spawning_complete(role, counts);
        }
    }

    pub fn stopping(&self, role: NodeRole) {
        for hook in &self.hooks {
            hook.on_stopping(role);
        }
    }

    /// Final exit code after every hook had a chance to override it.
    #[must_use]
    pub fn quitting(&self, role: NodeRole, exit_code: i32) -> i32 {
        self.hooks.iter().fold(exit_code, |code, hook| {
            hook.on_quitting(role, code).unwrap_or(code)
        })
    }
}

/// Hooks declared in the `[hooks]` table of the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigHooks {
    config: HooksConfig,
}

impl ConfigHooks {
    #[must_use]
    pub fn new(config: HooksConfig) -> Self {
        Self { config }
    }
}

impl RunHook for ConfigHooks {
    fn on_init(&self, role: NodeRole) -> Result<(), RunnerError> {
        match self.config.init_error.as_ref() {
            Some(message) => Err(RunnerError::HookFailed {
                hook: "init",
                message: format!("{} (on {})", message, role.as_str()),
            }),
            None => Ok(()),
        }
    }

    fn on_test_start(&self, role: NodeRole) -> HookAction {
        match self.config.test_start.as_ref() {
            Some(exit)
                if exit.roles.is_empty()
                    || exit.roles.iter().any(|name| name.eq_ignore_ascii_case(role.as_str())) =>
            {
                HookAction::Exit {
                    code: exit.exit_code,
                }
            }
            Some(_) | None => HookAction::Continue,
        }
    }

    fn on_quitting(&self, _role: NodeRole, _exit_code: i32) -> Option<i32> {
        self.config.quitting_exit_code
    }
}
