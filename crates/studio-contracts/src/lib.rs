pub mod events;
pub mod generation;
pub mod job;
pub mod receipts;
pub mod references;
pub mod request;
