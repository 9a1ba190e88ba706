pub mod cache;
pub mod cli;
pub mod dirty;
pub mod gesture;
pub mod logging;
pub mod progress;
pub mod remote;
pub mod settings;
pub mod store;
pub mod sync;
pub mod types;
