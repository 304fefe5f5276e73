use std::net::{SocketAddr, TcpStream};

use mio::Token;
use thunderdome::{Arena, Index};

use crate::Connection;

/// Who currently owns a connection.
pub(crate) enum Slot {
    /// Waiting for readiness on the reactor.
    Reactor(Connection),
    /// Moved into a task, comes back through the completion channel.
    Worker,
}

/// Reactor-side table of open connections, keyed by their mio token.
///
/// Only ever touched from the reactor thread.
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    slots: Arena<Slot>,
}

impl ConnectionRegistry {
    /// Track a newly accepted stream, assigning its token.
    pub fn insert(&mut self, stream: TcpStream, peer: SocketAddr) -> Token {
        let index = self.slots.insert(Slot::Worker);
        let token = to_token(index);

        self.slots[index] = Slot::Reactor(Connection::new(token, stream, peer));

        token
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        match self.slots.get_mut(to_index(token)?)? {
            Slot::Reactor(connection) => Some(connection),
            Slot::Worker => None,
        }
    }

    /// Move a connection out to a worker, leaving the slot marked as worker-owned.
    pub fn checkout(&mut self, token: Token) -> Option<Connection> {
        let slot = self.slots.get_mut(to_index(token)?)?;

        match std::mem::replace(slot, Slot::Worker) {
            Slot::Reactor(connection) => Some(connection),
            Slot::Worker => None,
        }
    }

    /// Return a connection from a worker to the reactor.
    ///
    /// Gives the connection back if its slot is gone or not worker-owned.
    pub fn checkin(&mut self, connection: Connection) -> Result<(), Connection> {
        let slot = to_index(connection.token()).and_then(|index| self.slots.get_mut(index));

        match slot {
            Some(slot) if matches!(slot, Slot::Worker) => {
                *slot = Slot::Reactor(connection);
                Ok(())
            }
            _ => Err(connection),
        }
    }

    /// Drop tracking of a connection, returning it if the reactor owned it.
    pub fn remove(&mut self, token: Token) -> Option<Connection> {
        match self.slots.remove(to_index(token)?)? {
            Slot::Reactor(connection) => Some(connection),
            Slot::Worker => None,
        }
    }

    pub fn is_worker_owned(&self, token: Token) -> bool {
        let slot = to_index(token).and_then(|index| self.slots.get(index));
        matches!(slot, Some(Slot::Worker))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Remove every connection, returning those the reactor owned.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.slots
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Reactor(connection) => Some(connection),
                Slot::Worker => None,
            })
            .collect()
    }
}

fn to_token(index: Index) -> Token {
    Token(index.to_bits() as usize)
}

fn to_index(token: Token) -> Option<Index> {
    Index::from_bits(token.0 as u64)
}
