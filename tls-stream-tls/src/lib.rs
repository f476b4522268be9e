//! A uniform TLS engine adapter over `rustls`, plus the shared [`Context`]
//! that configures it. The adapter hides `rustls` behind the small
//! handshake/encrypt/decrypt/shutdown surface `tls-stream`'s connection
//! pump speaks.

pub mod context;
pub mod engine;

pub use context::{Context, ContextBuilder, ContextFlags, VerifyFlags};
pub use engine::{DecryptOutcome, HandshakeStatus, TlsEngine};

#[cfg(test)]
mod tests;
