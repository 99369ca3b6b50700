// Background jobs

pub mod pending_sweeper;
