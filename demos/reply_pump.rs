//! A reply pump wired to in-memory backends.
//!
//! A client task sends replies into an in-memory queue; the pump built by
//! [`ResponsePumpFactory`] receives them in batches and hands each one to a
//! dispatcher that matches it against outstanding requests.
//!
//! Run with: `cargo run --example reply_pump`

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use evpump::{
    BoxError, Dispatcher, Dispose, PumpSettings, QueueManager, QueueName, Receiver,
    ResponsePumpFactory,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::info;

/// In-memory queue with a single consumer.
struct MemoryQueue {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

struct MemoryReceiver {
    queue: QueueName,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Receiver for MemoryReceiver {
    type Message = Vec<u8>;

    async fn receive(&self, batch_size: usize) -> Result<Vec<Vec<u8>>, BoxError> {
        let mut rx = self.rx.lock().await;
        let first = rx.recv().await.ok_or("sender hung up")?;
        let mut batch = vec![first];
        while batch.len() < batch_size {
            let Ok(message) = rx.try_recv() else { break };
            batch.push(message);
        }
        Ok(batch)
    }
}

impl Dispose for MemoryReceiver {
    fn dispose(&self) -> Result<(), BoxError> {
        info!(queue = %self.queue, "receiver closed");
        Ok(())
    }
}

impl QueueManager for MemoryQueue {
    type Receiver = MemoryReceiver;

    fn open_receiver(&self, queue: &QueueName) -> Result<Arc<MemoryReceiver>, BoxError> {
        let rx = self.rx.lock().take().ok_or("queue already has a receiver")?;
        info!(queue = %queue, "receiver opened");
        Ok(Arc::new(MemoryReceiver {
            queue: queue.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }))
    }
}

/// Completes outstanding requests as their replies arrive.
struct ReplyDispatcher {
    outstanding: Mutex<HashSet<u32>>,
    done: mpsc::UnboundedSender<u32>,
}

#[async_trait]
impl Dispatcher<Vec<u8>> for ReplyDispatcher {
    async fn handle(&self, message: Vec<u8>) -> Result<(), BoxError> {
        let text = String::from_utf8(message)?;
        let id: u32 = text
            .strip_prefix("reply:")
            .ok_or_else(|| format!("not a reply: {text}"))?
            .parse()?;
        if !self.outstanding.lock().remove(&id) {
            return Err(format!("no outstanding request {id}").into());
        }
        info!(request = id, "request completed");
        let _ = self.done.send(id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,evpump=debug".into()),
        )
        .init();

    let settings = PumpSettings::from_toml(
        r#"
        reply_queue_name = "replies.demo"
        default_batch_size = 4
        poll_interval_ms = 100
        "#,
    )?;

    let (tx, rx) = mpsc::unbounded_channel();
    let queue = Arc::new(MemoryQueue {
        rx: Mutex::new(Some(rx)),
    });
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(ReplyDispatcher {
        outstanding: Mutex::new((1..=8).collect()),
        done: done_tx,
    });

    let factory = ResponsePumpFactory::new(queue, dispatcher, settings);
    let pump = factory.create()?;
    pump.start()?;

    // Client side: replies for every outstanding request plus one stray.
    tokio::spawn(async move {
        for id in (1..=8).chain([42]) {
            let _ = tx.send(format!("reply:{id}").into_bytes());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    let mut completed = 0;
    while completed < 8 {
        match tokio::time::timeout(Duration::from_secs(5), done_rx.recv()).await {
            Ok(Some(_)) => completed += 1,
            _ => break,
        }
    }
    // Give the stray reply a chance to reach the dispatcher.
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(completed, pending = pump.pending(), "shutting down");

    factory.dispose()?;
    Ok(())
}
