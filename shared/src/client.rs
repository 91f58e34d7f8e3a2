//! Client registry.
//!
//! Clients are never removed while the relay iterates them. A failing client
//! is only flagged; [`ClientRegistry::prune`] compacts the list at the end of
//! the tick, keeping survivors in registration order.

use alloc::string::String;
use alloc::vec::Vec;

use crate::traits::{Connection, LinkError};

/// One accepted network peer
#[derive(Debug)]
pub struct Client<C> {
    connection: C,
    identifier: String,
    disconnected: bool,
}

impl<C: Connection> Client<C> {
    pub fn new(connection: C, identifier: String) -> Self {
        Self {
            connection,
            identifier,
            disconnected: false,
        }
    }

    /// Peer name captured at accept time
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn mark_disconnected(&mut self) {
        self.disconnected = true;
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Non-blocking read. Flags the client on close, reset or hard error.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.connection.read(buf) {
            Ok(0) => {
                self.disconnected = true;
                Err(LinkError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                if e.is_disconnect() {
                    self.disconnected = true;
                }
                Err(e)
            }
        }
    }

    /// Best-effort write. Failures never flag the client.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        self.connection.write(data)
    }
}

/// Ordered collection of live clients
#[derive(Debug)]
pub struct ClientRegistry<C> {
    clients: Vec<Client<C>>,
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
        }
    }
}

impl<C: Connection> ClientRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, connection: C, identifier: String) {
        self.clients.push(Client::new(connection, identifier));
    }

    /// Registered clients, including ones flagged this tick
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Whether any client is still usable
    pub fn has_active(&self) -> bool {
        self.clients.iter().any(|c| !c.disconnected)
    }

    /// Number of clients not flagged as disconnected
    pub fn active_count(&self) -> usize {
        self.clients.iter().filter(|c| !c.disconnected).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client<C>> {
        self.clients.iter()
    }

    /// Clients not flagged as disconnected, in registration order
    pub fn active_mut(&mut self) -> impl Iterator<Item = &mut Client<C>> {
        self.clients.iter_mut().filter(|c| !c.disconnected)
    }

    /// Write `data` to every active client.
    ///
    /// A failing client does not stop delivery to the rest. Returns how
    /// many clients took the whole payload.
    pub fn broadcast(&mut self, data: &[u8]) -> usize {
        let mut delivered = 0;
        for client in self.active_mut() {
            match client.send(data) {
                Ok(n) if n == data.len() => delivered += 1,
                Ok(n) => log::debug!(
                    "Short write to client {}: {} of {} bytes",
                    client.identifier,
                    n,
                    data.len()
                ),
                Err(e) => log::debug!("Write to client {} failed: {}", client.identifier, e),
            }
        }
        delivered
    }

    /// Close every active client from our side and flag it
    pub fn close_all(&mut self) {
        for client in self.active_mut() {
            client.connection.close();
            client.disconnected = true;
        }
    }

    /// Shut down both directions of every registered socket
    pub fn shutdown_all(&mut self) {
        for client in self.clients.iter_mut() {
            client.connection.shutdown();
        }
    }

    /// Drop flagged clients, keeping the rest in order. Returns the number removed.
    pub fn prune(&mut self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|c| {
            if c.disconnected {
                log::debug!("Removing client {}", c.identifier);
            }
            !c.disconnected
        });
        before - self.clients.len()
    }
}
