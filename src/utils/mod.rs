pub mod bridge;
pub mod progress;
