pub mod eventlog;
pub mod lru;
pub mod service;

pub use eventlog::*;
pub use lru::*;
pub use service::*;
