//! Core data model.
//!
//! A work item is one idea generation request: who asked (owner key), what
//! about (topic), and where it is in its lifecycle. Idea outputs are the
//! auxiliary rows a successful generation attempt leaves behind.

pub mod idea;
pub mod work;

pub use idea::{GeneratedIdea, IDEAS_PER_REQUEST, IdeaOutput};
pub use work::{ClaimedItem, NewWorkItem, Status, WorkId, WorkItem};
