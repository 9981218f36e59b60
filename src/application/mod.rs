//! Application services: document reads, refresh jobs and status fan-out.

pub mod documents;
pub mod error;
pub mod jobs;
pub mod refresh;
pub mod repos;
