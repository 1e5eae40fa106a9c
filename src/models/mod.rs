pub mod fleet;
pub mod job;
pub mod outcome;
pub mod status;
