pub mod common;
pub mod dispute;
pub mod sync;
