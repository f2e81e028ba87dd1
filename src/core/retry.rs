//! 带指数退避的重试策略
//!
//! 只重试临时性错误；认证、不存在、完整性失败一律立即返回

use crate::error::MirrorError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    /// 执行操作，临时错误按指数退避重试
    pub async fn run<T, F, Fut>(
        &self,
        cancelled: &AtomicBool,
        mut op: F,
    ) -> Result<T, MirrorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MirrorError>>,
    {
        let mut attempt = 0u32;

        loop {
            if cancelled.load(Ordering::SeqCst) {
                return Err(MirrorError::Cancelled);
            }

            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    // 指数退避
                    let delay = self.base_delay_ms * 2_u64.pow(attempt);
                    warn!(
                        "操作失败，{}ms 后重试 ({}/{}): {}",
                        delay,
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!("操作最终失败 (已重试{}次): {}", self.max_retries, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let cancelled = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 1);

        let result: Result<u32, _> = policy
            .run(&cancelled, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(MirrorError::Transient("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let cancelled = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, 1);

        let result: Result<(), _> = policy
            .run(&cancelled, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MirrorError::AccessDenied("secret".into())) }
            })
            .await;

        assert!(matches!(result, Err(MirrorError::AccessDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_short_circuits() {
        let cancelled = AtomicBool::new(true);
        let policy = RetryPolicy::new(3, 1);

        let result: Result<(), _> = policy.run(&cancelled, || async { Ok(()) }).await;
        assert!(matches!(result, Err(MirrorError::Cancelled)));
    }
}
