pub mod client;
pub mod command;
pub mod error;
pub mod matcher;
pub mod types;

pub use client::*;
pub use command::*;
pub use error::*;
pub use matcher::*;
pub use types::*;
