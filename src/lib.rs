pub mod config;
pub mod error;
pub mod prelude;
pub mod storage;
pub mod sweep;
