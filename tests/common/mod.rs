//! In-memory transport and dispatcher shared by the integration tests.

#![allow(dead_code)]

use std::sync::{
    Arc, Barrier,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use evpump::{BoxError, Dispatcher, Dispose, QueueManager, QueueName, Receiver};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Receiver fed through an unbounded channel.
pub struct MemoryReceiver {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    disposals: AtomicUsize,
    fail_dispose: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl MemoryReceiver {
    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Receiver for MemoryReceiver {
    type Message = String;

    async fn receive(&self, batch_size: usize) -> Result<Vec<String>, BoxError> {
        let mut rx = self.rx.lock().await;
        let Some(first) = rx.recv().await else {
            return Err("channel closed".into());
        };
        let mut batch = vec![first];
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }
        Ok(batch)
    }
}

impl Dispose for MemoryReceiver {
    fn dispose(&self) -> Result<(), BoxError> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push("receiver".to_string());
        if self.fail_dispose {
            return Err("receiver link already detached".into());
        }
        Ok(())
    }
}

/// Queue manager that opens at most one [`MemoryReceiver`].
pub struct MemoryQueueManager {
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    opened: Mutex<Option<Arc<MemoryReceiver>>>,
    unreachable: AtomicBool,
    panicking: AtomicBool,
    fail_dispose: bool,
    gate: Option<OpenGate>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl MemoryQueueManager {
    /// Returns the manager and the sender feeding its queue.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        Self::build(false, None)
    }

    /// Manager whose receivers fail to dispose.
    pub fn with_failing_dispose() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        Self::build(true, None)
    }

    /// Manager whose `open_receiver` parks until the test lets it through.
    pub fn gated() -> (Arc<Self>, mpsc::UnboundedSender<String>, OpenGate) {
        let gate = OpenGate {
            entered: Arc::new(Barrier::new(2)),
            release: Arc::new(Barrier::new(2)),
        };
        let (manager, tx) = Self::build(false, Some(gate.clone()));
        (manager, tx, gate)
    }

    fn build(
        fail_dispose: bool,
        gate: Option<OpenGate>,
    ) -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            inbound: Mutex::new(Some(rx)),
            opened: Mutex::new(None),
            unreachable: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            fail_dispose,
            gate,
            log: Arc::new(Mutex::new(Vec::new())),
        };
        (Arc::new(manager), tx)
    }

    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    /// Makes `open_receiver` panic, as a crashing broker client would.
    pub fn set_panicking(&self) {
        self.panicking.store(true, Ordering::SeqCst);
    }

    pub fn clear_panicking(&self) {
        self.panicking.store(false, Ordering::SeqCst);
    }

    pub fn receiver(&self) -> Option<Arc<MemoryReceiver>> {
        self.opened.lock().clone()
    }
}

impl QueueManager for MemoryQueueManager {
    type Receiver = MemoryReceiver;

    fn open_receiver(&self, queue: &QueueName) -> Result<Arc<MemoryReceiver>, BoxError> {
        if let Some(gate) = &self.gate {
            gate.entered.wait();
            gate.release.wait();
        }
        if self.panicking.load(Ordering::SeqCst) {
            panic!("broker client crashed opening {queue}");
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(format!("broker unreachable for {queue}").into());
        }
        let rx = self.inbound.lock().take().ok_or("queue already has a receiver")?;
        let receiver = Arc::new(MemoryReceiver {
            rx: tokio::sync::Mutex::new(rx),
            disposals: AtomicUsize::new(0),
            fail_dispose: self.fail_dispose,
            log: Arc::clone(&self.log),
        });
        *self.opened.lock() = Some(Arc::clone(&receiver));
        Ok(receiver)
    }
}

/// Two-step rendezvous with a parked `open_receiver` call.
#[derive(Clone)]
pub struct OpenGate {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl OpenGate {
    /// Blocks until `open_receiver` has been entered.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Lets the parked `open_receiver` call finish.
    pub fn release(&self) {
        self.release.wait();
    }
}

/// Dispatcher forwarding handled messages to a channel; messages starting
/// with `"poison"` fail.
pub struct RecordingDispatcher {
    handled: mpsc::UnboundedSender<String>,
}

impl RecordingDispatcher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { handled: tx }), rx)
    }
}

#[async_trait]
impl Dispatcher<String> for RecordingDispatcher {
    async fn handle(&self, message: String) -> Result<(), BoxError> {
        if message.starts_with("poison") {
            return Err(format!("cannot handle {message}").into());
        }
        self.handled
            .send(message)
            .map_err(|_| BoxError::from("test stopped listening"))
    }
}
