pub mod domain;
pub mod summary;

pub use domain::{Domain, OwnershipAttributes};
pub use summary::{Summary, SummaryAggregate, SummaryEdge, TimelineEntry};
