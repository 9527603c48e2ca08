pub mod auth;
pub mod error;
pub mod images;
pub mod meadows;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod storage;
pub mod trees;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::{AppState, AppStateInner};
pub use storage::ImageStore;
