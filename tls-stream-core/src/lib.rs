//! Shared primitives for the `tls-stream` adapter: the segmented ring
//! buffer used as ciphertext staging between the TLS engine and the
//! transport, and the TLS error taxonomy.

pub mod error;
pub mod ring;

pub use error::{err_name, strerror, Error};
pub use ring::{Position, RingBuffer, BLOCK_SIZE};
