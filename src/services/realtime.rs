//! Room-based event fan-out for WebSocket clients.
//!
//! Every emit is published on a [`backplane::Backplane`]; each process
//! subscribes to it and delivers to the sockets it holds locally.

pub mod backplane;
pub mod events;
pub mod hub;
