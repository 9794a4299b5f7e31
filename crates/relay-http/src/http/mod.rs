pub mod common;
pub mod error;
pub mod gateway;

pub use common::*;
pub use error::GatewayError;
pub use gateway::server::{AppState, AppStateInner, GatewaySettings, create_app_state, serve};
