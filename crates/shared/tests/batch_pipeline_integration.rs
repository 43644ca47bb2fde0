//! 批次累积与分发的集成测试
//!
//! 经由公开 API 串联累积器和分发器，用内存通道记录确认与拒绝。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use oms_shared::broker::{
    BatchAccumulator, BatchDispatcher, BatchHandler, BrokerChannel, DeadLetterArgs,
    DeliveryStream, ExchangeType, PendingDelivery,
};
use oms_shared::error::OmsError;
use oms_shared::messages::OrderStatusChangedMessage;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
enum Settled {
    Ack { tag: u64, multiple: bool },
    Nack { tag: u64, multiple: bool, requeue: bool },
}

#[derive(Default)]
struct RecordingChannel {
    settled: Mutex<Vec<Settled>>,
}

#[async_trait]
impl BrokerChannel for RecordingChannel {
    async fn declare_exchange(&self, _: &str, _: ExchangeType, _: bool, _: bool) -> Result<(), OmsError> {
        Ok(())
    }

    async fn declare_queue(&self, _: &str, _: bool, _: Option<DeadLetterArgs>) -> Result<(), OmsError> {
        Ok(())
    }

    async fn bind_queue(&self, _: &str, _: &str, _: &str) -> Result<(), OmsError> {
        Ok(())
    }

    async fn set_prefetch(&self, _: u16) -> Result<(), OmsError> {
        Ok(())
    }

    async fn consume(&self, _: &str, _: &str) -> Result<DeliveryStream, OmsError> {
        Ok(futures::stream::empty().boxed())
    }

    async fn ack(&self, tag: u64, multiple: bool) -> Result<(), OmsError> {
        self.settled.lock().unwrap().push(Settled::Ack { tag, multiple });
        Ok(())
    }

    async fn nack(&self, tag: u64, multiple: bool, requeue: bool) -> Result<(), OmsError> {
        self.settled
            .lock()
            .unwrap()
            .push(Settled::Nack { tag, multiple, requeue });
        Ok(())
    }

    async fn publish(&self, _: &str, _: &str, _: &[u8]) -> Result<(), OmsError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), OmsError> {
        Ok(())
    }
}

/// 订单号为负数的消息视为业务失败
struct RejectNegative {
    seen: Mutex<usize>,
}

#[async_trait]
impl BatchHandler for RejectNegative {
    type Message = OrderStatusChangedMessage;
    type Error = OmsError;

    async fn process_batch(&self, messages: Vec<Self::Message>) -> Result<(), OmsError> {
        *self.seen.lock().unwrap() += messages.len();
        if messages.iter().any(|m| m.order_id < 0) {
            return Err(OmsError::Handler("negative order id".to_string()));
        }
        Ok(())
    }
}

fn delivery(tag: u64, order_id: i64) -> PendingDelivery {
    let payload = serde_json::json!({
        "order_id": order_id,
        "order_status": "shipped",
        "customer_id": 1,
        "order_item_ids": [order_id * 10],
        "updated_at": "2024-05-01T10:00:00Z"
    });
    PendingDelivery::new(serde_json::to_vec(&payload).unwrap(), tag)
}

#[tokio::test]
async fn test_batches_settle_in_order_with_watermarks() {
    let channel = Arc::new(RecordingChannel::default());
    let handler = Arc::new(RejectNegative {
        seen: Mutex::new(0),
    });
    let (tx, rx) = mpsc::unbounded_channel();
    let accumulator = BatchAccumulator::new(2, tx);

    let dispatcher = BatchDispatcher::new("oms.order.status.changed", Arc::clone(&handler), channel.clone());
    let dispatch_task = tokio::spawn(dispatcher.run(rx));

    // 第一批成功，第二批含失败消息，第三批由定时刷新送出
    accumulator.append(delivery(1, 100)).await.unwrap();
    accumulator.append(delivery(2, 101)).await.unwrap();
    accumulator.append(delivery(3, -1)).await.unwrap();
    accumulator.append(delivery(4, 102)).await.unwrap();
    accumulator.append(delivery(5, 103)).await.unwrap();
    assert!(accumulator.flush().await.unwrap());
    assert!(!accumulator.flush().await.unwrap());

    drop(accumulator);
    dispatch_task.await.unwrap();

    assert_eq!(
        *channel.settled.lock().unwrap(),
        vec![
            Settled::Ack { tag: 2, multiple: true },
            Settled::Nack { tag: 4, multiple: true, requeue: false },
            Settled::Ack { tag: 5, multiple: true },
        ]
    );
    assert_eq!(*handler.seen.lock().unwrap(), 5);
}
