//! HTTP 接口
//!
//! 引擎之上的薄封装：参数校验、调用服务、统一响应格式。鉴权与 webhook 签名校验在上游完成。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
