pub mod context;
pub mod error;
pub mod orchestrator;
pub mod recipe;

pub use context::*;
pub use error::*;
pub use orchestrator::*;
pub use recipe::*;
