pub mod broker;
pub mod stream;

pub use broker::*;
pub use stream::*;
