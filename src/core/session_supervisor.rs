//! 会话监管：取消管理
//!
//! 持有根 CancellationToken；每次生成派生一个子 token，用户 Ctrl+C 只取消当前生成，
//! 进程退出时取消根 token。

use tokio_util::sync::CancellationToken;

/// 会话级取消管理
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    root: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为单次生成创建子 token
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 取消所有进行中的生成
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_cancel_does_not_propagate_up() {
        let sup = SessionSupervisor::new();
        let child = sup.child_token();
        child.cancel();
        assert!(!sup.is_shutdown());
    }

    #[test]
    fn test_shutdown_cancels_children() {
        let sup = SessionSupervisor::new();
        let child = sup.child_token();
        sup.shutdown();
        assert!(child.is_cancelled());
    }
}
