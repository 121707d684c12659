#![forbid(unsafe_code)]
#![warn(unreachable_pub)]

mod build_id;
pub mod json;
pub mod release;

pub use build_id::{should_update, BuildId, CompileTime, ParseBuildIdError};
pub use release::{select, ReleaseDescriptor};
