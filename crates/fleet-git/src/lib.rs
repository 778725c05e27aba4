pub mod command;
pub mod discover;
pub mod error;
pub mod feature;
pub mod lock;
pub mod repo;
pub mod scripted;
pub mod status;
pub mod worktree;

pub use command::*;
pub use discover::*;
pub use error::*;
pub use feature::*;
pub use lock::*;
pub use repo::*;
pub use scripted::*;
pub use status::*;
pub use worktree::*;
