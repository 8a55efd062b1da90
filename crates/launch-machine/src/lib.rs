//! Launch/operations state machine.
//!
//! A hierarchical, parallel state tree folded from an ordered list of operator
//! commands. Every transition is synchronous and deterministic; legality is a
//! pure predicate over the current [`Snapshot`].

pub mod checklist;
pub mod legality;
pub mod machine;
pub mod regions;
pub mod replay;

pub use checklist::{Checklist, Toggle};
pub use legality::{can_apply, can_send};
pub use machine::{Guards, IllegalCommand, MissionContext, Panel, Snapshot};
pub use regions::{
    AbortControl, CommandCenter, Cycle, FireCycle, LaunchRegion, OperationState, PreFireState,
    RecoveryState, TopState,
};
pub use replay::{replay, replay_lenient, ReplayError};
