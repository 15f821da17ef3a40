//! Alarm state machine.
//!
//! Producers (frame loop, seismic pipeline, HTTP handlers) never touch the
//! alarm fields directly. They send [`AlarmCommand`]s through a cloneable
//! [`AlarmHandle`]; one thread owns the [`AlarmStateMachine`] and applies them
//! in arrival order.
//!
//! ```text
//!            trigger(any)              trigger(any): no-op
//!   Idle ────────────────────▶ Active ◀─────────────┐
//!    ▲                           │  └────────────────┘
//!    └────────── silence ────────┘
//! ```
//!
//! There is no automatic timeout: an active alarm stays active until silenced.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::actuator::ActuatorQueue;
use crate::status::{LastEvent, StatusStore};
use crate::Modality;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmState {
    Idle,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmCommand {
    /// A modality confirmed an intrusion.
    Trigger(Modality),
    /// Operator acknowledged the alarm.
    Silence,
    /// Pulse the actuator without touching alarm state.
    TestPulse,
}

/// What applying a command did.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Activated(LastEvent),
    AlreadyActive,
    Silenced,
    AlreadyIdle,
    Pulsed,
}

#[derive(Debug)]
enum Envelope {
    Command(AlarmCommand),
    Shutdown,
}

/// Producer side of the alarm command channel.
#[derive(Clone, Debug)]
pub struct AlarmHandle {
    tx: Sender<Envelope>,
}

/// Consumer side for driving a state machine by hand.
pub struct AlarmInbox {
    rx: Receiver<Envelope>,
}

impl AlarmHandle {
    /// Unconnected channel. Commands wait in the inbox until
    /// [`AlarmStateMachine::drain`] applies them.
    pub fn channel() -> (AlarmHandle, AlarmInbox) {
        let (tx, rx) = mpsc::channel();
        (AlarmHandle { tx }, AlarmInbox { rx })
    }

    pub fn send(&self, command: AlarmCommand) -> Result<()> {
        self.tx
            .send(Envelope::Command(command))
            .map_err(|_| anyhow!("alarm state machine is not running"))
    }

    pub fn trigger(&self, modality: Modality) -> Result<()> {
        self.send(AlarmCommand::Trigger(modality))
    }

    pub fn silence(&self) -> Result<()> {
        self.send(AlarmCommand::Silence)
    }

    pub fn test_pulse(&self) -> Result<()> {
        self.send(AlarmCommand::TestPulse)
    }
}

pub struct AlarmStateMachine {
    status: StatusStore,
    actuator: ActuatorQueue,
    pulse: Duration,
    clock: fn() -> u64,
}

impl AlarmStateMachine {
    pub fn new(status: StatusStore, actuator: ActuatorQueue, pulse: Duration) -> Self {
        Self {
            status,
            actuator,
            pulse,
            clock: crate::unix_now,
        }
    }

    /// Replaces the wall clock used for event timestamps.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> AlarmState {
        if self.status.alarm_active() {
            AlarmState::Active
        } else {
            AlarmState::Idle
        }
    }

    pub fn apply(&mut self, command: AlarmCommand) -> Transition {
        match command {
            AlarmCommand::Trigger(modality) => {
                match self.status.activate(modality, (self.clock)()) {
                    Some(event) => {
                        log::warn!("alarm raised: {}", event.description);
                        self.actuator.pulse(self.pulse);
                        Transition::Activated(event)
                    }
                    None => Transition::AlreadyActive,
                }
            }
            AlarmCommand::Silence => {
                let was_active = self.status.deactivate();
                self.actuator.deactivate();
                if was_active {
                    log::info!("alarm silenced");
                    Transition::Silenced
                } else {
                    Transition::AlreadyIdle
                }
            }
            AlarmCommand::TestPulse => {
                log::info!("manual actuator test");
                self.actuator.pulse(self.pulse);
                self.actuator.deactivate();
                Transition::Pulsed
            }
        }
    }

    /// Applies every command already waiting in `inbox`.
    pub fn drain(&mut self, inbox: &AlarmInbox) -> Vec<Transition> {
        let mut applied = Vec::new();
        while let Ok(envelope) = inbox.rx.try_recv() {
            if let Envelope::Command(command) = envelope {
                applied.push(self.apply(command));
            }
        }
        applied
    }

    /// Moves the state machine onto its own thread.
    pub fn spawn(self) -> (AlarmHandle, AlarmWorker) {
        let (handle, inbox) = AlarmHandle::channel();
        let tx = handle.tx.clone();
        let join = std::thread::spawn(move || run_alarm(self, inbox));
        (
            handle,
            AlarmWorker {
                tx,
                join: Some(join),
            },
        )
    }
}

/// Owns the alarm thread.
pub struct AlarmWorker {
    tx: Sender<Envelope>,
    join: Option<JoinHandle<()>>,
}

impl AlarmWorker {
    /// Applies commands sent before the call, then joins the thread.
    pub fn stop(mut self) -> Result<()> {
        let _ = self.tx.send(Envelope::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("alarm thread panicked"))?;
        }
        Ok(())
    }
}

fn run_alarm(mut machine: AlarmStateMachine, inbox: AlarmInbox) {
    log::debug!("alarm state machine started");
    while let Ok(envelope) = inbox.rx.recv() {
        match envelope {
            Envelope::Command(command) => {
                let transition = machine.apply(command);
                log::debug!("alarm {:?} -> {:?}", command, transition);
            }
            Envelope::Shutdown => break,
        }
    }
    log::debug!("alarm state machine stopped");
}
