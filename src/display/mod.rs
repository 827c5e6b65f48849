pub mod grouping;

pub use grouping::{
    AgentEvent, AgentGroup, DEFAULT_TRUNCATE_LEN, GroupStatus, RESULT_PHASE,
    group_events_by_agent, truncate_message,
};
