pub mod http;
pub mod supervisor;

pub use http::*;
pub use supervisor::{RelaySettings, run_relay};
