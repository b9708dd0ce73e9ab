use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::QueueError;

/// Producer side of a work queue. A `delay` defers delivery.
#[async_trait]
pub trait Queue<M: Send + 'static>: Send + Sync {
    async fn send(&self, message: M, delay: Option<Duration>) -> Result<(), QueueError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SentMessage<M> {
    pub message: M,
    pub delay: Option<Duration>,
}

/// Number of most recent sends a [`MemoryQueue`] keeps for inspection.
pub const SENT_LOG_CAPACITY: usize = 1024;

/// In-process queue. Delayed messages are delivered by a timer task; the most
/// recent [`SENT_LOG_CAPACITY`] sends are also recorded for inspection.
pub struct MemoryQueue<M> {
    name: String,
    sender: mpsc::UnboundedSender<M>,
    sent: Arc<Mutex<VecDeque<SentMessage<M>>>>,
}

impl<M> Clone for MemoryQueue<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
            sent: self.sent.clone(),
        }
    }
}

impl<M: Clone + Send + 'static> MemoryQueue<M> {
    pub fn new(name: impl Into<String>) -> (Self, QueueReceiver<M>) {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                name: name.clone(),
                sender,
                sent: Arc::new(Mutex::new(VecDeque::new())),
            },
            QueueReceiver { name, receiver },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sent(&self) -> Vec<SentMessage<M>> {
        let sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.iter().cloned().collect()
    }

    fn record(&self, message: M, delay: Option<Duration>) {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        if sent.len() == SENT_LOG_CAPACITY {
            sent.pop_front();
        }
        sent.push_back(SentMessage { message, delay });
    }
}

#[async_trait]
impl<M: Clone + Send + Sync + 'static> Queue<M> for MemoryQueue<M> {
    async fn send(&self, message: M, delay: Option<Duration>) -> Result<(), QueueError> {
        self.record(message.clone(), delay);

        match delay.filter(|delay| !delay.is_zero()) {
            None => self
                .sender
                .send(message)
                .map_err(|_| QueueError::Closed(self.name.clone())),
            Some(delay) => {
                let sender = self.sender.clone();
                let name = self.name.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if sender.send(message).is_err() {
                        debug!(queue = %name, "queue closed before delayed delivery");
                    }
                });
                Ok(())
            }
        }
    }
}

/// Consumer side of a [`MemoryQueue`]. Yields `None` once every producer is
/// gone.
pub struct QueueReceiver<M> {
    name: String,
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> QueueReceiver<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }
}
