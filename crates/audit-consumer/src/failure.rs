//! 故障注入
//!
//! 每第 N 个批次返回错误，用于演练死信链路。计数器属于单个实例，
//! 不同处理器、不同测试之间互不影响。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AuditError;

#[derive(Debug, Default)]
pub struct FailureInjector {
    every_nth: u64,
    batches: AtomicU64,
}

impl FailureInjector {
    /// `every_nth = 0` 表示关闭
    pub fn every_nth(every_nth: u64) -> Self {
        Self {
            every_nth,
            batches: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.every_nth > 0
    }

    /// 记录一个新批次，轮到故障批次时返回错误
    pub fn check(&self) -> Result<(), AuditError> {
        let batch = self.batches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.is_enabled() && batch % self.every_nth == 0 {
            return Err(AuditError::InjectedFailure { batch });
        }
        Ok(())
    }

    pub fn batches_seen(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }
}
