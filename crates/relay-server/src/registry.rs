//! Registry: the shared display name → outbound sink mapping.

use std::collections::HashMap;

use parking_lot::Mutex;
use relay_protocol::{ChatError, ChatResult, Messages, validate_name};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of queuing one line on a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The client has fallen `capacity` lines behind.
    Full,
    /// The owning session is gone.
    Closed,
}

/// Where lines for one client are queued.
///
/// The receiving end belongs to the client's own session, which writes
/// queued lines to its transport. Delivering never blocks, so it is safe
/// to do while holding the registry lock and from any session's task.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::Sender<String>,
    evicted: CancellationToken,
}

impl OutboundSink {
    /// Create a sink holding at most `capacity` undelivered lines.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            evicted: CancellationToken::new(),
        };
        (sink, rx)
    }

    /// Queue one line without waiting.
    pub fn deliver(&self, line: String) -> Delivery {
        match self.tx.try_send(line) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Fires once the registry has dropped this client for falling behind.
    pub fn evicted(&self) -> CancellationToken {
        self.evicted.clone()
    }

    fn same_client(&self, other: &OutboundSink) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Who is online, and how to reach them.
///
/// Every operation runs under one global lock: registration, removal,
/// broadcast iteration and private lookup+deliver all serialize against each
/// other. A broadcast therefore reaches exactly the clients registered when
/// it took the lock. The lock is held only while lines are queued on the
/// sinks, never while they are written to sockets. A client whose queue is
/// full is removed on the spot and its session is told to disconnect, so
/// nobody stays registered while missing lines.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Mutex<HashMap<String, OutboundSink>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `sink`. Fails without touching the registry if the
    /// name is empty or already held.
    pub fn try_register(&self, name: &str, sink: OutboundSink) -> ChatResult<()> {
        validate_name(name)?;

        let mut clients = self.clients.lock();
        if clients.contains_key(name) {
            return Err(ChatError::NameTaken(name.to_string()));
        }
        clients.insert(name.to_string(), sink);
        debug!("Registered {name} ({} online)", clients.len());
        Ok(())
    }

    /// Remove `name` if present. Returns whether an entry was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut clients = self.clients.lock();
        let removed = clients.remove(name).is_some();
        if removed {
            debug!("Unregistered {name} ({} online)", clients.len());
        }
        removed
    }

    /// Remove `name` only while it still belongs to `sink`. An evicted
    /// client's name may already have been claimed by someone else.
    pub fn release(&self, name: &str, sink: &OutboundSink) -> bool {
        let mut clients = self.clients.lock();
        match clients.get(name) {
            Some(current) if current.same_client(sink) => {
                clients.remove(name);
                debug!("Unregistered {name} ({} online)", clients.len());
                true
            }
            _ => false,
        }
    }

    /// Current sink for `name`. May be stale as soon as it is returned.
    pub fn lookup(&self, name: &str) -> Option<OutboundSink> {
        self.clients.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.lock().contains_key(name)
    }

    /// Queue `text` for every registered client except `exclude`.
    /// Returns how many clients it was queued for.
    pub fn broadcast(&self, text: &str, exclude: Option<&str>) -> usize {
        let mut clients = self.clients.lock();
        let mut delivered = 0;
        let mut lagging = Vec::new();
        for (name, sink) in clients.iter() {
            if exclude == Some(name.as_str()) {
                continue;
            }
            match sink.deliver(text.to_string()) {
                Delivery::Queued => delivered += 1,
                Delivery::Full => lagging.push(name.clone()),
                Delivery::Closed => debug!("Broadcast to {name} dropped, session gone"),
            }
        }
        for name in lagging {
            evict(&mut clients, &name);
        }
        delivered
    }

    /// Queue `[Private] <sender>: <text>` for `target` only.
    pub fn send_private(&self, sender: &str, target: &str, text: &str) -> ChatResult<()> {
        let mut clients = self.clients.lock();
        let sink = clients
            .get(target)
            .ok_or_else(|| ChatError::TargetUnavailable(target.to_string()))?;
        match sink.deliver(Messages::private(sender, text)) {
            Delivery::Queued => Ok(()),
            Delivery::Full => {
                evict(&mut clients, target);
                Err(ChatError::TargetUnavailable(target.to_string()))
            }
            Delivery::Closed => Err(ChatError::SinkClosed(target.to_string())),
        }
    }

    /// Sorted snapshot of registered names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

/// Drop a client that stopped draining its queue and tell its session.
fn evict(clients: &mut HashMap<String, OutboundSink>, name: &str) {
    if let Some(sink) = clients.remove(name) {
        warn!("Disconnecting {name}: outbound queue full ({} online)", clients.len());
        sink.evicted.cancel();
    }
}
