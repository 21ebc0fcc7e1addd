//! Signal collectors.
//!
//! Each collector is independently invokable and produces one of the
//! typed signal sets. A failure or timeout in one collector never
//! aborts the others; the pipeline converts it into an Unavailable
//! set and keeps going.

pub mod behavior;
pub mod content;
pub mod profile;

pub use behavior::BehaviorCollector;
pub use content::{ContentCollector, ContentPatterns};
pub use profile::ProfileCollector;
