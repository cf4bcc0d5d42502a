//! 日志初始化
//!
//! RUST_LOG 优先于配置中的 log_level；未显式指定时压低 sqlx 与 hyper 的噪音。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 第三方依赖的默认级别
const NOISY_TARGETS: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn"];

pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_filter(&config.log_level));

    // JSON 日志带上当前 span（customer_id、order_id 等字段在 span 上）
    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// 由配置级别构造过滤器，非法级别回落到 info
pub fn build_filter(level: &str) -> EnvFilter {
    let directives = std::iter::once(level)
        .chain(NOISY_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
}
