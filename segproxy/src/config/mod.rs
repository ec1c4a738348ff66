#[allow(clippy::module_inception)]
mod config;
mod error;
mod rule;

pub use config::*;
pub use error::*;
pub use rule::*;
