mod decision;
mod dispatching;
mod policy;
mod rule;

pub use decision::*;
pub use dispatching::*;
pub use policy::*;
pub use rule::*;
