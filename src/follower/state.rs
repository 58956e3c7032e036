//! Follow subscription lifecycle
//!
//! A subscription attaches to a running tail, and either detaches (the
//! listener went away or asked to stop) or closes because the tail ended.

use state_machines::state_machine;

state_machine! {
    name: FollowMachine,
    dynamic: true,
    initial: Idle,
    states: [Idle, Tailing, Closed],
    events {
        attach {
            transition: { from: Idle, to: Tailing }
        }
        detach {
            transition: { from: Tailing, to: Idle }
        }
        close {
            transition: { from: Tailing, to: Closed }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Tailing,
    Closed,
}

impl State {
    fn from_name(name: &str) -> Self {
        match name {
            "Tailing" => State::Tailing,
            "Closed" => State::Closed,
            _ => State::Idle,
        }
    }
}

/// Lifecycle of one (subscriber, camera) follow
pub struct Subscription {
    machine: DynamicFollowMachine<()>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            machine: FollowMachine::new(()).into_dynamic(),
        }
    }

    pub fn state(&self) -> State {
        State::from_name(self.machine.current_state())
    }

    pub fn attach(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(FollowMachineEvent::Attach)
    }

    pub fn detach(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(FollowMachineEvent::Detach)
    }

    pub fn close(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(FollowMachineEvent::Close)
    }
}
