use std::sync::Arc;

use tracing::error;

use orchard_db::Database;

use crate::error::{ApiError, ApiResult};
use crate::storage::ImageStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub images: ImageStore,
}

/// Run blocking store work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppStateInner) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("background task failed".into())
        })?
}
