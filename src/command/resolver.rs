use super::{Command, CommandExecutor};
use crate::core::{Result, StageError};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a command to the executors it must run against.
pub trait ExecutorResolver: Send + Sync {
    fn resolve(&self, command: &dyn Command) -> Result<Vec<Arc<dyn CommandExecutor>>>;
}

/// Sends every command to the same executor.
pub struct SingleExecutorResolver {
    executor: Arc<dyn CommandExecutor>,
}

impl SingleExecutorResolver {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

impl ExecutorResolver for SingleExecutorResolver {
    fn resolve(&self, _command: &dyn Command) -> Result<Vec<Arc<dyn CommandExecutor>>> {
        Ok(vec![Arc::clone(&self.executor)])
    }
}

/// Routes commands by target, with an optional fallback executor.
///
/// A target registered with several executors fans out to all of them.
#[derive(Default)]
pub struct RoutingResolver {
    routes: HashMap<String, Vec<Arc<dyn CommandExecutor>>>,
    fallback: Option<Arc<dyn CommandExecutor>>,
}

impl RoutingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, target: &str, executor: Arc<dyn CommandExecutor>) -> Self {
        self.routes.entry(target.to_string()).or_default().push(executor);
        self
    }

    pub fn fallback(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }
}

impl ExecutorResolver for RoutingResolver {
    fn resolve(&self, command: &dyn Command) -> Result<Vec<Arc<dyn CommandExecutor>>> {
        if let Some(executors) = self.routes.get(command.target()) {
            return Ok(executors.clone());
        }
        self.fallback
            .as_ref()
            .map(|executor| vec![Arc::clone(executor)])
            .ok_or_else(|| StageError::ExecutorNotFound(command.target().to_string()))
    }
}
