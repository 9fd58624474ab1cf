use crate::types::{WorkItem, WorkItemId};
use crate::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Cancels one submitted item. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Queued items are dropped when dequeued; an in-flight attempt is abandoned.
    /// Either way the item resolves with [`Error::Cancelled`] and is not logged.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Future resolving to the provider response of one submitted item.
#[derive(Debug)]
pub struct DispatchHandle {
    id: WorkItemId,
    receiver: oneshot::Receiver<Result<Value>>,
    cancel: CancelHandle,
}

impl DispatchHandle {
    pub fn id(&self) -> WorkItemId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Future for DispatchHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(Error::Shutdown)))
    }
}

/// A work item travelling through the queue with its reply channel.
pub(crate) struct Envelope {
    pub item: WorkItem,
    pub reply: oneshot::Sender<Result<Value>>,
    pub cancel: CancellationToken,
}

impl Envelope {
    pub fn new(item: WorkItem) -> (Self, DispatchHandle) {
        let (reply, receiver) = oneshot::channel();
        let cancel = CancellationToken::new();
        let handle = DispatchHandle {
            id: item.id,
            receiver,
            cancel: CancelHandle {
                token: cancel.clone(),
            },
        };
        (
            Self {
                item,
                reply,
                cancel,
            },
            handle,
        )
    }

    pub fn resolve(self, outcome: Result<Value>) {
        // the caller may have dropped its handle
        let _ = self.reply.send(outcome);
    }
}
