//! 记忆协作方：按层名取回上下文
//!
//! 存储细节不属于编排器；这里只有 MemoryProvider 接口、空实现与静态实现（测试 / 本地运行）。

use std::collections::BTreeMap;

use async_trait::async_trait;

/// 每轮请求的记忆层
pub const MEMORY_LAYERS: [&str; 9] = [
    "inner_personal",
    "outer_personal",
    "personal",
    "interests",
    "preferences",
    "custom",
    "codebase",
    "aesthetic",
    "project",
];

/// 层名 -> 内容
pub type MemoryContext = BTreeMap<String, String>;

/// 记忆协作方，需支持并发独立调用
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn get_context(&self, layers: &[&str]) -> Result<MemoryContext, String>;
}

/// 空实现：未接入记忆时使用
#[derive(Clone, Debug, Default)]
pub struct NoopMemory;

#[async_trait]
impl MemoryProvider for NoopMemory {
    async fn get_context(&self, _layers: &[&str]) -> Result<MemoryContext, String> {
        Ok(MemoryContext::new())
    }
}

/// 固定内容的记忆，只返回被请求的层
#[derive(Clone, Debug, Default)]
pub struct StaticMemory {
    layers: MemoryContext,
}

impl StaticMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.layers.insert(name.into(), content.into());
        self
    }
}

#[async_trait]
impl MemoryProvider for StaticMemory {
    async fn get_context(&self, layers: &[&str]) -> Result<MemoryContext, String> {
        Ok(self
            .layers
            .iter()
            .filter(|(name, _)| layers.contains(&name.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_memory_filters_layers() {
        let memory = StaticMemory::new()
            .with_layer("personal", "name: Ada")
            .with_layer("secret", "hidden");
        let ctx = memory.get_context(&MEMORY_LAYERS).await.unwrap();
        assert_eq!(ctx.get("personal").map(String::as_str), Some("name: Ada"));
        assert!(!ctx.contains_key("secret"));
    }
}
