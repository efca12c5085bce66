//! Workflow description parsing and validation: turns an external JSON
//! document into a verified `Workflow` value the scheduling core can run.

pub mod schema;

pub use schema::parse_workflow;
