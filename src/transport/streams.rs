//! Stream pipe between a response-generation task and its forwarder
//!
//! One pipe per in-flight response. The producer half is moved into the worker
//! task; the consumer half stays with the forwarding loop. The buffer is
//! unbounded, so `push` never blocks and never drops a chunk. The consumer
//! polls without blocking indefinitely, which lets the forwarder notice that
//! the producer has gone away.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::{ChatError, Result};

/// Result of polling the consumer half
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// Next chunk in push order
    Chunk(String),
    /// Nothing buffered right now, producer still alive
    Empty,
    /// Producer is gone and every chunk has been drained
    Closed,
}

/// Counters shared by both halves
#[derive(Debug, Default)]
pub struct PipeStats {
    pushed: AtomicU64,
    pulled: AtomicU64,
}

impl PipeStats {
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn pulled(&self) -> u64 {
        self.pulled.load(Ordering::Relaxed)
    }

    /// Chunks pushed but not yet pulled
    pub fn backlog(&self) -> u64 {
        self.pushed().saturating_sub(self.pulled())
    }
}

/// Factory for single-producer/single-consumer chunk pipes
pub struct StreamPipe;

impl StreamPipe {
    /// Open a new pipe. Pipes are never reused across responses.
    pub fn open() -> (PipeProducer, PipeConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(PipeStats::default());
        (
            PipeProducer {
                tx,
                stats: Arc::clone(&stats),
            },
            PipeConsumer { rx, stats },
        )
    }
}

/// Producer half, owned by the response-generation task
#[derive(Debug)]
pub struct PipeProducer {
    tx: mpsc::UnboundedSender<String>,
    stats: Arc<PipeStats>,
}

impl PipeProducer {
    /// Append a chunk. Fails only when the consumer has been dropped.
    pub fn push(&self, chunk: impl Into<String>) -> Result<()> {
        self.tx
            .send(chunk.into())
            .map_err(|_| ChatError::transport("Stream pipe consumer dropped"))?;
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> &PipeStats {
        &self.stats
    }
}

/// Consumer half, owned by the forwarding loop
#[derive(Debug)]
pub struct PipeConsumer {
    rx: mpsc::UnboundedReceiver<String>,
    stats: Arc<PipeStats>,
}

impl PipeConsumer {
    /// Non-blocking poll
    pub fn pull(&mut self) -> Pull {
        match self.rx.try_recv() {
            Ok(chunk) => self.pulled(chunk),
            Err(TryRecvError::Empty) => Pull::Empty,
            Err(TryRecvError::Disconnected) => Pull::Closed,
        }
    }

    /// Wait at most `wait` for the next chunk
    pub async fn pull_timeout(&mut self, wait: Duration) -> Pull {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(chunk)) => self.pulled(chunk),
            Ok(None) => Pull::Closed,
            Err(_) => Pull::Empty,
        }
    }

    /// Whether the producer half still exists
    pub fn producer_alive(&self) -> bool {
        !self.rx.is_closed()
    }

    pub fn stats(&self) -> &PipeStats {
        &self.stats
    }

    fn pulled(&self, chunk: String) -> Pull {
        self.stats.pulled.fetch_add(1, Ordering::Relaxed);
        Pull::Chunk(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_is_fifo() {
        let (producer, mut consumer) = StreamPipe::open();
        for i in 0..5 {
            producer.push(format!("chunk-{}", i)).unwrap();
        }

        for i in 0..5 {
            assert_eq!(consumer.pull(), Pull::Chunk(format!("chunk-{}", i)));
        }
        assert_eq!(consumer.pull(), Pull::Empty);
        assert_eq!(consumer.stats().pushed(), 5);
        assert_eq!(consumer.stats().backlog(), 0);
    }

    #[test]
    fn test_pipe_drains_before_closed() {
        let (producer, mut consumer) = StreamPipe::open();
        producer.push("last").unwrap();
        drop(producer);

        assert!(!consumer.producer_alive());
        assert_eq!(consumer.pull(), Pull::Chunk("last".to_string()));
        assert_eq!(consumer.pull(), Pull::Closed);
    }

    #[test]
    fn test_push_after_consumer_dropped_fails() {
        let (producer, consumer) = StreamPipe::open();
        drop(consumer);
        assert!(producer.push("orphan").is_err());
        assert_eq!(producer.stats().pushed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_timeout_returns_empty_while_producer_alive() {
        let (producer, mut consumer) = StreamPipe::open();
        assert_eq!(
            consumer.pull_timeout(Duration::from_millis(50)).await,
            Pull::Empty
        );
        assert!(consumer.producer_alive());

        producer.push("late").unwrap();
        assert_eq!(
            consumer.pull_timeout(Duration::from_millis(50)).await,
            Pull::Chunk("late".to_string())
        );
    }

    #[tokio::test]
    async fn test_cross_task_order_preserved() {
        let (producer, mut consumer) = StreamPipe::open();
        let task = tokio::spawn(async move {
            for i in 0..100 {
                producer.push(i.to_string()).unwrap();
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        let mut received = Vec::new();
        loop {
            match consumer.pull_timeout(Duration::from_millis(10)).await {
                Pull::Chunk(c) => received.push(c.parse::<u32>().unwrap()),
                Pull::Empty => continue,
                Pull::Closed => break,
            }
        }
        task.await.unwrap();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }
}
