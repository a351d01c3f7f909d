pub mod destination;
pub mod diff;
pub mod job;
