//! Actuator module - Side-effecting actions the controller may invoke
//!
//! Defines the handler interface commands are executed through, and the
//! statically registered table of actions this node exposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving an actuator
#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("Hardware fault: {0}")]
    Hardware(String),

    #[error("Actuator busy")]
    Busy,
}

pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// An action the controller can trigger remotely.
///
/// Every action takes a duration in whole seconds; this is the only
/// side-effecting hook the protocol engine calls into.
#[async_trait]
pub trait Actuator: Send + Sync + Debug {
    async fn execute(&self, seconds: u64) -> ActuatorResult<()>;
}

/// Statically registered set of executable actions, keyed by name
pub struct ActionTable {
    actions: HashMap<String, Arc<dyn Actuator>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Table with the actions this node ships with
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register("pump", Arc::new(Pump::new()));
        table
    }

    pub fn register(&mut self, name: &str, actuator: Arc<dyn Actuator>) {
        self.actions.insert(name.to_string(), actuator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Actuator>> {
        self.actions.get(name).cloned()
    }

    /// Registered action names, for diagnostics
    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Water pump behind a timed solenoid valve.
///
/// Opens the valve, holds it for the requested duration, then closes it.
#[derive(Debug)]
pub struct Pump;

impl Pump {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Pump {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for Pump {
    async fn execute(&self, seconds: u64) -> ActuatorResult<()> {
        tracing::info!("pumping water for {}s", seconds);
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        tracing::info!("pump stopped");
        Ok(())
    }
}
