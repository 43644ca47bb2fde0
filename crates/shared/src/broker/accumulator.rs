//! 批次累积器
//!
//! 投递接收路径与定时器路径共享的缓冲区，由同一把异步互斥锁保护：
//! 追加与取出互不交错，两次取出也不会相互竞争。
//!
//! 取出的批次在仍持有锁时送入分发队列，保证批次按取出顺序被确认。
//! 否则后取出的批次可能先做 multiple ack，把前一个尚在处理的批次一并确认掉。

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::error::OmsError;

/// 待处理的投递
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub payload: Vec<u8>,
    /// 通道内单调递增
    pub delivery_tag: u64,
    pub received_at: DateTime<Utc>,
}

impl PendingDelivery {
    pub fn new(payload: Vec<u8>, delivery_tag: u64) -> Self {
        Self {
            payload,
            delivery_tag,
            received_at: Utc::now(),
        }
    }
}

/// 一次性取出的批次，永不为空
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    deliveries: Vec<PendingDelivery>,
}

impl Batch {
    /// 空集合不构成批次
    pub fn new(deliveries: Vec<PendingDelivery>) -> Option<Self> {
        if deliveries.is_empty() {
            None
        } else {
            Some(Self { deliveries })
        }
    }

    /// 批次内最大的投递标签，确认/拒绝都以它为水位线
    pub fn watermark(&self) -> u64 {
        self.deliveries
            .iter()
            .map(|d| d.delivery_tag)
            .max()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn delivery_tags(&self) -> Vec<u64> {
        self.deliveries.iter().map(|d| d.delivery_tag).collect()
    }

    pub fn deliveries(&self) -> &[PendingDelivery] {
        &self.deliveries
    }

    /// 批次中最早一条投递的接收时间
    pub fn oldest_received_at(&self) -> Option<DateTime<Utc>> {
        self.deliveries.iter().map(|d| d.received_at).min()
    }
}

/// 批次累积器
pub struct BatchAccumulator {
    buffer: Mutex<Vec<PendingDelivery>>,
    batch_size: usize,
    flush_tx: mpsc::UnboundedSender<Batch>,
}

impl BatchAccumulator {
    /// `flush_tx` 的接收端由分发任务持有
    pub fn new(batch_size: usize, flush_tx: mpsc::UnboundedSender<Batch>) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
            flush_tx,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 追加一条投递；缓冲区达到阈值时在同一临界区内取出并入队
    ///
    /// 返回是否触发了刷新。每次越过阈值恰好刷新一次，
    /// 因为刷新后缓冲区已清空。
    pub async fn append(&self, delivery: PendingDelivery) -> Result<bool, OmsError> {
        let mut buffer = self.buffer.lock().await;
        buffer.push(delivery);

        if buffer.len() < self.batch_size {
            return Ok(false);
        }

        let batch = Self::take(&mut buffer).ok_or_else(|| {
            OmsError::Internal("缓冲区达到阈值但为空".to_string())
        })?;
        debug!(size = batch.len(), watermark = batch.watermark(), "批次达到阈值，触发刷新");
        self.flush_tx
            .send(batch)
            .map_err(|_| OmsError::ConsumerStopped)?;
        Ok(true)
    }

    /// 定时器路径：缓冲区为空时什么也不做
    pub async fn flush(&self) -> Result<bool, OmsError> {
        let mut buffer = self.buffer.lock().await;
        let Some(batch) = Self::take(&mut buffer) else {
            return Ok(false);
        };

        debug!(size = batch.len(), watermark = batch.watermark(), "批次超时，触发刷新");
        self.flush_tx
            .send(batch)
            .map_err(|_| OmsError::ConsumerStopped)?;
        Ok(true)
    }

    /// 原子地取出当前全部缓冲内容，不经过分发队列
    pub async fn drain_all(&self) -> Option<Batch> {
        let mut buffer = self.buffer.lock().await;
        Self::take(&mut buffer)
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }

    fn take(buffer: &mut Vec<PendingDelivery>) -> Option<Batch> {
        Batch::new(std::mem::take(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn delivery(tag: u64) -> PendingDelivery {
        PendingDelivery::new(format!("{{\"tag\":{tag}}}").into_bytes(), tag)
    }

    #[test]
    fn test_batch_never_empty() {
        assert!(Batch::new(vec![]).is_none());
    }

    #[test]
    fn test_watermark_is_max_tag() {
        let batch = Batch::new(vec![delivery(11), delivery(12), delivery(10)]).unwrap();
        assert_eq!(batch.watermark(), 12);
        assert_eq!(batch.delivery_tags(), vec![11, 12, 10]);
        assert!(batch.oldest_received_at().is_some());
    }

    #[tokio::test]
    async fn test_threshold_flushes_once_per_crossing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acc = BatchAccumulator::new(3, tx);

        assert!(!acc.append(delivery(10)).await.unwrap());
        assert!(!acc.append(delivery(11)).await.unwrap());
        assert!(acc.append(delivery(12)).await.unwrap());
        // 越过阈值后的下一次追加从空缓冲区重新计数
        assert!(!acc.append(delivery(13)).await.unwrap());

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.delivery_tags(), vec![10, 11, 12]);
        assert_eq!(batch.watermark(), 12);
        assert!(rx.try_recv().is_err());
        assert_eq!(acc.len().await, 1);
    }

    #[tokio::test]
    async fn test_flush_on_empty_is_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acc = BatchAccumulator::new(5, tx);

        assert!(!acc.flush().await.unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_flush_sends_partial_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acc = BatchAccumulator::new(5, tx);
        acc.append(delivery(7)).await.unwrap();
        acc.append(delivery(8)).await.unwrap();

        assert!(assert_ok!(acc.flush().await));
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.delivery_tags(), vec![7, 8]);
        assert!(acc.is_empty().await);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_reports_stopped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let acc = BatchAccumulator::new(1, tx);

        let err = acc.append(delivery(1)).await.unwrap_err();
        assert!(matches!(err, OmsError::ConsumerStopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_not_lost() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let acc = Arc::new(BatchAccumulator::new(usize::MAX, tx));

        let handles: Vec<_> = (1..=200u64)
            .map(|tag| {
                let acc = Arc::clone(&acc);
                tokio::spawn(async move { acc.append(delivery(tag)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let batch = acc.drain_all().await.unwrap();
        assert_eq!(batch.len(), 200);
        let mut tags = batch.delivery_tags();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), 200);
        assert!(acc.drain_all().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_append_and_flush_preserve_every_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let acc = Arc::new(BatchAccumulator::new(7, tx));

        let appender = {
            let acc = Arc::clone(&acc);
            tokio::spawn(async move {
                for tag in 1..=500u64 {
                    acc.append(delivery(tag)).await.unwrap();
                }
            })
        };
        let flusher = {
            let acc = Arc::clone(&acc);
            tokio::spawn(async move {
                for _ in 0..100 {
                    acc.flush().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        appender.await.unwrap();
        flusher.await.unwrap();
        acc.flush().await.unwrap();

        let mut seen = Vec::new();
        let mut last_watermark = 0;
        while let Ok(batch) = rx.try_recv() {
            // 入队顺序与取出顺序一致，水位线单调递增
            assert!(batch.watermark() > last_watermark);
            last_watermark = batch.watermark();
            seen.extend(batch.delivery_tags());
        }
        assert_eq!(seen, (1..=500).collect::<Vec<_>>());
    }
}
