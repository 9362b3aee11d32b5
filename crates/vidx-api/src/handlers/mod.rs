//! Request handlers.

pub mod health;
pub mod jobs;
pub mod search;
pub mod stats;
pub mod videos;

pub use health::*;
pub use jobs::*;
pub use search::*;
pub use stats::*;
pub use videos::*;
