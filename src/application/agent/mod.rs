pub mod loop_agent;
pub mod states;

pub use loop_agent::{AgentDeps, LoopAgent};
pub use states::{AgentEvent, AgentState, next_state};
