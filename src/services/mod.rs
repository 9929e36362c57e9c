pub mod live;

pub use live::{size_wager, LiveSession, LiveSources, StepOutcome};
