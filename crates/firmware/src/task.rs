//! Task state machine
//!
//! Every peripheral handler, and the dispatcher itself, carries a
//! [`TaskState`]. Only `Running` tasks serve requests; `reset` parks a task in
//! `Stopped` while its pending state is discarded and then restores whatever
//! state it had before.

use crate::error::HandlerError;
use common::lock;
use protocol::{Packet, Status};
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    None,
    Running,
    /// Reserved
    Idle,
    Stopped,
}

/// Task state shared between a task and its interrupt producers
#[derive(Debug, Default)]
pub struct StateCell {
    state: Mutex<TaskState>,
}

impl StateCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self) -> TaskState {
        *lock(&self.state)
    }

    pub fn set(&self, state: TaskState) {
        *lock(&self.state) = state;
    }

    pub fn is_running(&self) -> bool {
        self.get() == TaskState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == TaskState::Stopped
    }

    /// Run `f` with the task parked in `Stopped`, then restore the prior state
    pub fn while_stopped<R>(&self, f: impl FnOnce() -> R) -> R {
        let prev = self.get();
        self.set(TaskState::Stopped);
        let result = f();
        self.set(prev);
        result
    }
}

/// A peripheral request handler
///
/// Tasks form a chain of responsibility: the dispatcher offers every request
/// to every task and each task acts only on the packet types it owns.
pub trait Task: Send {
    fn name(&self) -> &'static str;

    fn state(&self) -> &StateCell;

    fn init(&mut self) {
        self.state().set(TaskState::Running);
    }

    /// Drop pending device-side state such as queued events
    fn clear(&mut self) {}

    fn reset(&mut self) {
        let prev = self.state().get();
        self.state().set(TaskState::Stopped);
        self.clear();
        self.state().set(prev);
    }

    /// Serve `request`, appending results to `response`
    ///
    /// Requests of foreign types must be left alone.
    fn handle(&mut self, request: &Packet, response: &mut Packet) -> Result<(), HandlerError>;

    fn process(&mut self, request: &Packet, response: &mut Packet) {
        if !self.state().is_running() {
            trace!(
                "{} task not running, ignoring {}",
                self.name(),
                request.raw_type()
            );
            return;
        }
        if let Err(e) = self.handle(request, response) {
            warn!("{} task rejected request: {}", self.name(), e);
            response.set_status(Status::Err);
        }
    }
}
