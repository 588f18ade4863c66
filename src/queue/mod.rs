//! Lock-free queueing primitives shared by the pipeline and the event loops.

mod mpmc;
mod priority;

pub use mpmc::MpmcQueue;
pub use priority::{Priority, PriorityQueue};
