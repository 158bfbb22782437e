//! Transport layer for node communication
//!
//! Provides QUIC-based transport using Quinn with TLS encryption, and the
//! pooled [`QuicRouter`](pool::QuicRouter) built on it.

mod pool;
mod quic;

pub use pool::QuicRouter;
pub use quic::make_client_endpoint;
