mod context;
mod dispatcher;
pub mod error;
mod http_inbound;
mod response;
mod session;

pub use context::*;
pub use dispatcher::*;
pub use http_inbound::*;
pub use response::*;
pub use session::*;
