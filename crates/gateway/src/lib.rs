pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{router, run_server};
pub use state::AppState;
