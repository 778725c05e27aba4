pub mod cli;
pub mod logging;
pub mod render;
pub mod service;

pub use cli::*;
pub use logging::*;
pub use render::*;
pub use service::*;
