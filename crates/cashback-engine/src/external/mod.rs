//! 外部系统客户端
//!
//! - 订单源：按游标分页读取历史订单
//! - 储值发放：把返现同步到电商平台的储值账户
//!
//! 两者都以 trait 暴露，服务层不依赖具体传输方式。外部储值余额不作为权威数据，
//! 本地账本独立对账。

mod credit_issuer;
mod order_feed;

pub use credit_issuer::{
    CreditIssueRequest, CreditIssueResponse, CreditIssuer, FieldError, HttpCreditIssuer,
};
pub use order_feed::{HttpOrderFeed, OrderFeed};

#[cfg(test)]
pub use credit_issuer::MockCreditIssuer;
#[cfg(test)]
pub use order_feed::MockOrderFeed;
