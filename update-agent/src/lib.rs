pub mod agent;
pub mod client;
pub mod download;
pub mod fetch;
pub mod flash;
pub mod lock;
pub mod persistence;
pub mod retry;
pub mod settings;
pub mod space;
pub mod state;
pub mod util;

pub use agent::{Agent, Outcome};
pub use settings::{Args, Settings};
