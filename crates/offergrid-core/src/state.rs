//! Control-protocol state of a task and the FSM events that move it.
//!
//! `State` is what a deployed process reports about its control phase.
//! Besides the real FSM states there are three synthetic values used only
//! when folding many tasks into one summary: `Unknown`, `Mixed` and
//! `Invariant` (the identity of the product).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[default]
    Unknown,
    Standby,
    Configured,
    Running,
    Error,
    Done,
    Mixed,
    Invariant,
}

impl State {
    /// The `X` product used to roll up child states into a parent summary.
    ///
    /// Equal operands return themselves, `Error` absorbs everything,
    /// `Invariant` is the identity, anything else is `Mixed`.
    pub fn product(self, other: State) -> State {
        if self == other {
            return self;
        }
        if self == State::Error || other == State::Error {
            return State::Error;
        }
        if self == State::Invariant {
            return other;
        }
        if other == State::Invariant {
            return self;
        }
        State::Mixed
    }

    /// Fold a sequence of states with [`State::product`]. An empty sequence
    /// folds to `Invariant`.
    pub fn fold<I: IntoIterator<Item = State>>(states: I) -> State {
        states
            .into_iter()
            .fold(State::Invariant, |acc, s| acc.product(s))
    }

    /// Destination of `event` when fired from this state, if the FSM allows it.
    pub fn next(self, event: Event) -> Option<State> {
        use Event::*;
        use State::*;
        match (self, event) {
            (Standby, Configure) => Some(Configured),
            (Configured, Reset) => Some(Standby),
            (Configured, Start) => Some(Running),
            (Running, Stop) => Some(Configured),
            (Standby | Configured | Running, GoError) => Some(Error),
            (Error, Recover) => Some(Standby),
            (Standby | Configured | Error, Exit) => Some(Done),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Unknown => "UNKNOWN",
            State::Standby => "STANDBY",
            State::Configured => "CONFIGURED",
            State::Running => "RUNNING",
            State::Error => "ERROR",
            State::Done => "DONE",
            State::Mixed => "MIXED",
            State::Invariant => "INVARIANT",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = std::convert::Infallible;

    /// Unrecognised names map to `Unknown` rather than failing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "STANDBY" => State::Standby,
            "CONFIGURED" => State::Configured,
            "RUNNING" => State::Running,
            "ERROR" => State::Error,
            "DONE" => State::Done,
            "MIXED" => State::Mixed,
            "INVARIANT" => State::Invariant,
            _ => State::Unknown,
        })
    }
}

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Configure,
    Reset,
    Start,
    Stop,
    Exit,
    GoError,
    Recover,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Configure => "CONFIGURE",
            Event::Reset => "RESET",
            Event::Start => "START",
            Event::Stop => "STOP",
            Event::Exit => "EXIT",
            Event::GoError => "GO_ERROR",
            Event::Recover => "RECOVER",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONFIGURE" => Ok(Event::Configure),
            "RESET" => Ok(Event::Reset),
            "START" => Ok(Event::Start),
            "STOP" => Ok(Event::Stop),
            "EXIT" => Ok(Event::Exit),
            "GO_ERROR" => Ok(Event::GoError),
            "RECOVER" => Ok(Event::Recover),
            other => Err(CoreError::InvalidTransition {
                event: other.to_string(),
                source_state: "*".to_string(),
            }),
        }
    }
}

/// A fully specified FSM edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub event: Event,
    pub source: State,
    pub destination: State,
}

impl Transition {
    /// Build the transition for `event` fired from `source`, rejecting edges
    /// the FSM does not have.
    pub fn new(source: State, event: Event) -> CoreResult<Self> {
        let destination = source.next(event).ok_or_else(|| CoreError::InvalidTransition {
            event: event.to_string(),
            source_state: source.to_string(),
        })?;
        Ok(Self {
            event,
            source,
            destination,
        })
    }
}
