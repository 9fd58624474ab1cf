//! 请求队列：多生产者/多消费者的 FIFO 队列，支持关闭信号。
//!
//! # Request Queue
//!
//! FIFO queue of pending work shared by all dispatch workers.
//!
//! - `enqueue` never blocks; a bounded queue rejects with [`Error::QueueFull`]
//! - `dequeue` suspends until an item arrives or the queue is closed
//! - after [`close`](RequestQueue::close), queued items still drain in order,
//!   then `dequeue` returns `None`
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use ai_dispatch::queue::RequestQueue;
//!
//! let queue = RequestQueue::unbounded();
//! queue.enqueue("a").unwrap();
//! queue.enqueue("b").unwrap();
//! queue.close();
//! assert_eq!(queue.dequeue().await, Some("a"));
//! assert_eq!(queue.dequeue().await, Some("b"));
//! assert_eq!(queue.dequeue().await, None);
//! # });
//! ```

use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
pub struct RequestQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
    capacity: Option<usize>,
}

impl<T> RequestQueue<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Notify::new(),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn enqueue(&self, item: T) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.closed {
                return Err(Error::QueueClosed);
            }
            if let Some(capacity) = self.capacity {
                if inner.items.len() >= capacity {
                    return Err(Error::QueueFull { capacity });
                }
            }
            inner.items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Next item in arrival order, or `None` once the queue is closed and empty.
    ///
    /// Cancel-safe: an item is only removed in the poll that returns it.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .pop_front()
    }

    /// Stop accepting items and wake every blocked consumer.
    pub fn close(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.available.notify_waiters();
    }

    /// Remove everything still queued, in order.
    pub fn drain_pending(&self) -> Vec<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .drain(..)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
