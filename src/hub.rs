use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::wire;

pub type ClientId = u64;

/// One connected participant as the hub sees it: a display name plus the
/// sending half of that participant's outbound sink. Names need not be
/// unique and may be empty; identity is the id, allocated per sink by
/// [`HubHandle::client`].
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub sink: UnboundedSender<String>,
}

/// An event submitted to the hub by a session.
#[derive(Debug)]
pub enum Event {
    Join(Client),
    Leave(Client),
    Message(String),
}

/// Sending side of the hub's single event channel, cloned into every
/// session. All events from all sessions funnel through this one queue, and
/// the order they enter it is the order the hub applies them.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: UnboundedSender<Event>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Binds a name and a fresh sink into a [`Client`] with a new identity.
    pub fn client(&self, name: String, sink: UnboundedSender<String>) -> Client {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Client { id, name, sink }
    }

    /// Submits an event. The queue is unbounded, so this never blocks, and a
    /// hub that has already stopped simply drops the event.
    pub fn submit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// The broadcast hub: sole owner of the connected-client set. All membership
/// mutation and fan-out happens inside [`Hub::run`], one event at a time, so
/// no other synchronization exists anywhere in the crate.
pub struct Hub {
    events: UnboundedReceiver<Event>,
    clients: HashMap<ClientId, Client>,
}

impl Hub {
    pub fn new() -> (Hub, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            events: rx,
            clients: HashMap::new(),
        };
        let handle = HubHandle {
            events: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, handle)
    }

    /// Runs until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                Event::Join(client) => self.join(client),
                Event::Leave(client) => self.leave(&client),
                Event::Message(text) => self.broadcast(&text),
            }
        }
        debug!("event channel closed, hub stopping");
    }

    fn join(&mut self, client: Client) {
        let sink = client.sink.clone();
        debug!(
            id = client.id,
            name = %client.name,
            total = self.clients.len() + 1,
            "client joined"
        );
        // Insert before enumerating so the welcome roster lists the joiner too.
        self.clients.insert(client.id, client);
        let _ = sink.send(wire::WELCOME_HEADER.to_string());
        for member in self.clients.values() {
            let _ = sink.send(member.name.clone());
        }
    }

    fn leave(&mut self, client: &Client) {
        // Removing the entry drops the hub's sender; once the session drops
        // its own copy the sink closes and the writer drains and stops.
        if self.clients.remove(&client.id).is_some() {
            debug!(
                id = client.id,
                name = %client.name,
                total = self.clients.len(),
                "client left"
            );
        }
    }

    fn broadcast(&self, text: &str) {
        for client in self.clients.values() {
            // Sinks are unbounded: a slow peer queues, it never blocks the hub.
            let _ = client.sink.send(text.to_string());
        }
    }
}
