//! Level-scoped cooperative cancellation.
//!
//! Each level of a run gets a fresh [`CancellationToken`]. The first step
//! of the level to stop or fail raises it; siblings that have not started
//! yet observe it and are never invoked.

mod token;

pub use token::CancellationToken;
