mod synchronizer;
mod types;


pub use synchronizer::Synchronizer;
pub use types::SyncSummary;
