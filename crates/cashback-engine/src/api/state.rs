//! 应用状态定义

use crate::engine::Engine;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
