// Bounded hand-off queue between the stream client and the question selector
//
// Carries opaque compressed payloads. The sender side waits while the queue is
// full, so a slow consumer stalls the producer instead of losing data. The
// receiver side offers a deadline-bounded get that reports "nothing yet" as a
// value and a non-blocking drain for discarding stale items.

use crate::error::{PickerError, PickerResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outcome of a deadline-bounded get
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Payload(Vec<u8>),
    /// Deadline elapsed with nothing buffered
    Empty,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_put: u64,
    pub total_received: u64,
    pub total_drained: u64,
    pub current_size: usize,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct QueueCounters {
    total_put: AtomicU64,
    total_received: AtomicU64,
    total_drained: AtomicU64,
}

/// Create a queue holding at most `capacity` payloads
pub fn payload_queue(capacity: usize) -> PickerResult<(QueueSender, QueueReceiver)> {
    if capacity == 0 {
        return Err(PickerError::InvalidConfig(
            "queue capacity must be greater than zero".to_string(),
        ));
    }

    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(QueueCounters::default());

    Ok((
        QueueSender {
            tx,
            counters: Arc::clone(&counters),
        },
        QueueReceiver {
            rx,
            counters,
            capacity,
        },
    ))
}

/// Writer half, held by the stream client
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Vec<u8>>,
    counters: Arc<QueueCounters>,
}

impl QueueSender {
    /// Enqueue a payload, waiting while the queue is at capacity
    pub async fn put(&self, payload: Vec<u8>) -> PickerResult<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| PickerError::QueueClosed)?;
        self.counters.total_put.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Reader half, owned by the question selector
pub struct QueueReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
    counters: Arc<QueueCounters>,
    capacity: usize,
}

impl QueueReceiver {
    /// Wait for the next payload until `deadline`.
    ///
    /// An elapsed deadline is `Ok(Received::Empty)`. `Err(QueueClosed)` means
    /// every sender is gone and nothing is left to read.
    pub async fn get_with_timeout(&mut self, deadline: Instant) -> PickerResult<Received> {
        match tokio::time::timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(payload)) => {
                self.counters.total_received.fetch_add(1, Ordering::Relaxed);
                Ok(Received::Payload(payload))
            }
            Ok(None) => Err(PickerError::QueueClosed),
            Err(_) => Ok(Received::Empty),
        }
    }

    /// Discard everything currently buffered without waiting; returns the count
    pub fn drain_nonblocking(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        self.counters
            .total_drained
            .fetch_add(drained as u64, Ordering::Relaxed);
        drained
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_put: self.counters.total_put.load(Ordering::Relaxed),
            total_received: self.counters.total_received.load(Ordering::Relaxed),
            total_drained: self.counters.total_drained.load(Ordering::Relaxed),
            current_size: self.rx.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            payload_queue(0),
            Err(PickerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_put_get_fifo() {
        let (tx, mut rx) = payload_queue(4).unwrap();
        tx.put(vec![1]).await.unwrap();
        tx.put(vec![2]).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            rx.get_with_timeout(deadline).await.unwrap(),
            Received::Payload(vec![1])
        );
        assert_eq!(
            rx.get_with_timeout(deadline).await.unwrap(),
            Received::Payload(vec![2])
        );

        let metrics = rx.metrics();
        assert_eq!(metrics.total_put, 2);
        assert_eq!(metrics.total_received, 2);
        assert_eq!(metrics.current_size, 0);
        assert_eq!(metrics.capacity, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_times_out_with_empty() {
        let (_tx, mut rx) = payload_queue(4).unwrap();
        let started = Instant::now();
        let deadline = started + Duration::from_secs(5);

        assert_eq!(rx.get_with_timeout(deadline).await.unwrap(), Received::Empty);
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test]
    async fn test_get_reports_closed_queue() {
        let (tx, mut rx) = payload_queue(4).unwrap();
        tx.put(vec![9]).await.unwrap();
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(1);
        // Buffered items are still delivered after the sender is gone
        assert_eq!(
            rx.get_with_timeout(deadline).await.unwrap(),
            Received::Payload(vec![9])
        );
        assert!(matches!(
            rx.get_with_timeout(deadline).await,
            Err(PickerError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_drain_twice_is_noop() {
        let (tx, mut rx) = payload_queue(8).unwrap();
        for i in 0..3u8 {
            tx.put(vec![i]).await.unwrap();
        }

        assert_eq!(rx.drain_nonblocking(), 3);
        assert_eq!(rx.drain_nonblocking(), 0);
        assert!(rx.is_empty());
        assert_eq!(rx.metrics().total_drained, 3);

        drop(tx);
        assert_eq!(rx.drain_nonblocking(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_stalls_producer() {
        let (tx, mut rx) = payload_queue(2).unwrap();
        tx.put(vec![1]).await.unwrap();
        tx.put(vec![2]).await.unwrap();

        let producer = tx.clone();
        let blocked = tokio::spawn(async move { producer.put(vec![3]).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());
        assert_eq!(rx.len(), 2);

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            rx.get_with_timeout(deadline).await.unwrap(),
            Received::Payload(vec![1])
        );
        blocked.await.unwrap().unwrap();
        assert_eq!(rx.len(), 2);
    }
}
