mod http;
mod relay;
pub(crate) mod segment;

pub use http::*;
pub use relay::*;
pub use segment::*;
