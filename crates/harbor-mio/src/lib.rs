//! Mio based reactor for harbor.
//!
//! One thread multiplexes readiness of the listener and every idle connection, parsing requests
//! as bytes arrive. Complete requests move to a `WorkerPool` together with their connection, and
//! come back through a channel once handled.

mod connection;
mod reactor;
mod registry;

pub use self::{
    connection::Connection,
    reactor::{Reactor, ReactorOptions, RequestHandler, StopHandle},
};
