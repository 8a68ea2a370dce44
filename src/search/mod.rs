//! 搜索子系统：协作方接口、HTTP 客户端、预搜索与循环内搜索

pub mod augment;
pub mod client;

pub use augment::{needs_live_info, FollowUp, Preflight, SearchAugmenter, SEARCH_RESULT_LIMIT};
pub use client::{HttpSearchClient, NoopSearch, SearchProvider, SearchResult};
