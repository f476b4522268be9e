//! A non-blocking TLS stream: `connect`/`accept`/`read`/`write`/`shutdown`
//! over any transport that already implements
//! [`tokio::io::AsyncRead`] + [`tokio::io::AsyncWrite`], with an
//! [`tokio::io::AsyncRead`]/[`tokio::io::AsyncWrite`] impl of its own so it
//! drops in anywhere a plain async stream is expected.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::io::{AsyncRead, AsyncWrite};
//! use tls_stream::{Connection, Context, ContextBuilder, ContextFlags, VerifyFlags};
//!
//! # async fn connect<T: AsyncRead + AsyncWrite + Unpin>(
//! #     transport: T,
//! # ) -> Result<(), tls_stream::Error> {
//! let mut builder = ContextBuilder::new(ContextFlags::LIB_INIT);
//! builder.set_verify_flags(VerifyFlags::PEER_CERT | VerifyFlags::PEER_IDENT);
//! let context: Arc<Context> = builder.build()?;
//!
//! let mut conn = Connection::connect(transport, context, "example.com").await?;
//! conn.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//! let mut buf = [0u8; 1024];
//! let n = conn.read(&mut buf).await?;
//! let _ = &buf[..n];
//! conn.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;

pub use connection::{Connection, Error};
pub use tls_stream_tls::{Context, ContextBuilder, ContextFlags, VerifyFlags};

#[cfg(test)]
mod tests;
