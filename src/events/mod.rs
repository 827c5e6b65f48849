pub mod classify;

pub use classify::{
    Activity, ControlSignal, EventClass, EventName, ScopedEvent, classify, parse_event_name,
};
