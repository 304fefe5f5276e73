//! Static file server on top of the harbor reactor and worker pool.

pub mod config;
pub mod handler;
pub mod signal;
