//! HTTP 客户端构建

use reqwest::{Client, ClientBuilder};

/// 构建失败时记 warn 并退回默认客户端（此时配置的超时不生效）
pub fn build_client(builder: ClientBuilder, purpose: &str) -> Client {
    match builder.build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(client = purpose, error = %e, "HTTP client build failed, configured timeouts are not applied");
            Client::new()
        }
    }
}
