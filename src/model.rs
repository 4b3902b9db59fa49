//! Core data model.
//!
//! A work item is something that needs doing. The core only cares about its
//! identity and its status; title and description are opaque payload.

pub mod work;

pub use work::{NewWorkItem, Status, WorkId, WorkItem};
