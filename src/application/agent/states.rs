//! Data-driven OODA state machine.
//!
//! The transition table is plain data so the full machine can be property-
//! tested without instantiating providers or platforms. `Stop` requests and
//! fatal errors terminate from any state and are handled outside the table.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Idle,
    Learning,
    Perception,
    Reasoning,
    RiskCheck,
    Execution,
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Idle => "IDLE",
            AgentState::Learning => "LEARNING",
            AgentState::Perception => "PERCEPTION",
            AgentState::Reasoning => "REASONING",
            AgentState::RiskCheck => "RISK_CHECK",
            AgentState::Execution => "EXECUTION",
            AgentState::Stopped => "STOPPED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEvent {
    IntervalElapsed,
    OutcomesProcessed,
    KillSwitchTriggered,
    MarketOk,
    ActionableSignal,
    NoActionableSignal,
    Approved,
    Rejected,
    ExecutionSucceeded,
    ExecutionFailed,
    /// Recoverable fault during PERCEPTION or REASONING
    TransientFault,
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// (from, event, to)
pub const TRANSITIONS: &[(AgentState, AgentEvent, AgentState)] = &[
    (AgentState::Idle, AgentEvent::IntervalElapsed, AgentState::Learning),
    (AgentState::Learning, AgentEvent::OutcomesProcessed, AgentState::Perception),
    (AgentState::Perception, AgentEvent::KillSwitchTriggered, AgentState::Stopped),
    (AgentState::Perception, AgentEvent::MarketOk, AgentState::Reasoning),
    (AgentState::Perception, AgentEvent::TransientFault, AgentState::Perception),
    (AgentState::Perception, AgentEvent::NoActionableSignal, AgentState::Idle),
    (AgentState::Reasoning, AgentEvent::ActionableSignal, AgentState::RiskCheck),
    (AgentState::Reasoning, AgentEvent::NoActionableSignal, AgentState::Idle),
    (AgentState::Reasoning, AgentEvent::TransientFault, AgentState::Perception),
    (AgentState::RiskCheck, AgentEvent::Approved, AgentState::Execution),
    (AgentState::RiskCheck, AgentEvent::Rejected, AgentState::Perception),
    (AgentState::Execution, AgentEvent::ExecutionSucceeded, AgentState::Learning),
    (AgentState::Execution, AgentEvent::ExecutionFailed, AgentState::Perception),
];

/// Look up the next state; `None` means the event is not legal in `from`.
pub fn next_state(from: AgentState, event: AgentEvent) -> Option<AgentState> {
    TRANSITIONS
        .iter()
        .find(|(f, e, _)| *f == from && *e == event)
        .map(|(_, _, to)| *to)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: &[AgentState] = &[
        AgentState::Idle,
        AgentState::Learning,
        AgentState::Perception,
        AgentState::Reasoning,
        AgentState::RiskCheck,
        AgentState::Execution,
        AgentState::Stopped,
    ];

    const ALL_EVENTS: &[AgentEvent] = &[
        AgentEvent::IntervalElapsed,
        AgentEvent::OutcomesProcessed,
        AgentEvent::KillSwitchTriggered,
        AgentEvent::MarketOk,
        AgentEvent::ActionableSignal,
        AgentEvent::NoActionableSignal,
        AgentEvent::Approved,
        AgentEvent::Rejected,
        AgentEvent::ExecutionSucceeded,
        AgentEvent::ExecutionFailed,
        AgentEvent::TransientFault,
    ];

    #[test]
    fn test_happy_path_cycle() {
        let mut state = AgentState::Idle;
        for event in [
            AgentEvent::IntervalElapsed,
            AgentEvent::OutcomesProcessed,
            AgentEvent::MarketOk,
            AgentEvent::ActionableSignal,
            AgentEvent::Approved,
            AgentEvent::ExecutionSucceeded,
            AgentEvent::OutcomesProcessed,
        ] {
            state = next_state(state, event).expect("legal transition");
        }
        assert_eq!(state, AgentState::Perception);
    }

    #[test]
    fn test_no_signal_returns_to_idle() {
        let state = next_state(AgentState::Reasoning, AgentEvent::NoActionableSignal).unwrap();
        assert_eq!(state, AgentState::Idle);
    }

    #[test]
    fn test_rejection_returns_to_perception() {
        let state = next_state(AgentState::RiskCheck, AgentEvent::Rejected).unwrap();
        assert_eq!(state, AgentState::Perception);
    }

    #[test]
    fn test_execution_failure_returns_to_perception() {
        let state = next_state(AgentState::Execution, AgentEvent::ExecutionFailed).unwrap();
        assert_eq!(state, AgentState::Perception);
    }

    #[test]
    fn test_kill_switch_is_terminal() {
        let state = next_state(AgentState::Perception, AgentEvent::KillSwitchTriggered).unwrap();
        assert_eq!(state, AgentState::Stopped);
        // Nothing leaves Stopped through the table
        for event in ALL_EVENTS {
            assert_eq!(next_state(AgentState::Stopped, *event), None);
        }
    }

    // Every table entry must start from a live state, and every live state
    // except Stopped must have at least one exit.
    #[test]
    fn test_table_is_well_formed() {
        for (from, _, _) in TRANSITIONS {
            assert_ne!(*from, AgentState::Stopped);
        }
        for state in ALL_STATES {
            if *state == AgentState::Stopped {
                continue;
            }
            assert!(
                TRANSITIONS.iter().any(|(f, _, _)| f == state),
                "state {} has no exits",
                state
            );
        }
    }

    // The table is deterministic: at most one target per (state, event).
    #[test]
    fn test_table_is_deterministic() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                let targets: Vec<_> = TRANSITIONS
                    .iter()
                    .filter(|(f, e, _)| f == state && e == event)
                    .collect();
                assert!(
                    targets.len() <= 1,
                    "ambiguous transition from {} on {}",
                    state,
                    event
                );
            }
        }
    }
}
