pub mod app_state;
pub mod constants;
pub mod handlers;
pub mod registry;
pub mod routes;
pub mod rpc;
pub mod utils;

pub use app_state::{AppState, init_app_state, init_app_state_with};
