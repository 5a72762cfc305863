pub mod manager;
pub mod scheduler;

pub use manager::SessionManager;
pub use scheduler::{PollOutcome, RefreshHandle, RefreshScheduler, SessionState};
