use std::{
    future::poll_fn,
    io::{self, IoSlice},
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use tls_stream_core::{RingBuffer, BLOCK_SIZE};
use tls_stream_tls::{Context, DecryptOutcome, HandshakeStatus, TlsEngine};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, instrument, trace};

pub use tls_stream_core::Error;

/// Soft cap on buffered-but-unsent ciphertext. Crossing it makes `write`
/// drain existing output before encrypting any more.
const MAX_OUTGOING_BYTES: u64 = 4 * 1024 * 1024;

/// Maximum accepted hostname length for SNI / identity verification.
const MAX_HOSTNAME_LEN: usize = 255;

/// Connection lifecycle. The accept-loop state a plain listener would need
/// lives in the caller's transport, not here: a `Connection` is always
/// built from an already-connected or already-accepted `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Handshaking,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Client,
    Server,
}

/// A non-blocking TLS stream layered over any `T: AsyncRead + AsyncWrite`.
///
/// Besides the explicit [`connect`](Self::connect)/[`accept`](Self::accept)/
/// [`read`](Self::read)/[`write`](Self::write)/[`shutdown`](Self::shutdown)
/// operations, `Connection<T>` implements [`AsyncRead`] and [`AsyncWrite`]
/// so it drops in anywhere a plain async stream is expected; the async
/// methods are themselves thin wrappers over the `poll_*` trait impls.
pub struct Connection<T> {
    transport: T,
    #[allow(dead_code)]
    context: Arc<Context>,
    incoming: RingBuffer,
    outgoing: RingBuffer,
    engine: TlsEngine,
    state: ConnState,
    mode: Mode,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn check_hostname(hostname: &str) -> Result<(), Error> {
        if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
            return Err(Error::Einval);
        }
        Ok(())
    }

    /// Wraps `transport` as a client connection and drives the handshake
    /// to completion before returning.
    #[instrument(skip(transport, context))]
    pub async fn connect(
        transport: T,
        context: Arc<Context>,
        hostname: &str,
    ) -> Result<Self, Error> {
        Self::check_hostname(hostname)?;
        let engine = TlsEngine::client(&context, hostname)?;
        let mut conn = Self {
            transport,
            context,
            incoming: RingBuffer::new(),
            outgoing: RingBuffer::new(),
            engine,
            state: ConnState::Handshaking,
            mode: Mode::Client,
        };
        poll_fn(|cx| conn.poll_drive_handshake(cx)).await?;
        Ok(conn)
    }

    /// Wraps an already-accepted `transport` as a server connection and
    /// drives the handshake to completion before returning. The TCP accept
    /// loop itself belongs to the caller's transport, not to this type.
    #[instrument(skip(transport, context))]
    pub async fn accept(transport: T, context: Arc<Context>) -> Result<Self, Error> {
        let engine = TlsEngine::server(&context)?;
        let mut conn = Self {
            transport,
            context,
            incoming: RingBuffer::new(),
            outgoing: RingBuffer::new(),
            engine,
            state: ConnState::Handshaking,
            mode: Mode::Server,
        };
        poll_fn(|cx| conn.poll_drive_handshake(cx)).await?;
        Ok(conn)
    }

    /// Reads whatever ciphertext is currently available from the transport
    /// into `incoming`'s tail block. `Ready(Ok(0))` means the transport hit
    /// EOF.
    fn poll_fill_incoming(&mut self, cx: &mut TaskContext<'_>) -> Poll<io::Result<usize>> {
        let dst = self.incoming.tail_block(BLOCK_SIZE);
        let mut buf = ReadBuf::new(dst);
        match Pin::new(&mut self.transport).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len();
                self.incoming.tail_block_commit(n);
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Drains everything buffered in `outgoing` to the transport via
    /// vectored writes.
    fn poll_flush_outgoing(&mut self, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        loop {
            let mut slices = [IoSlice::new(&[]); 4];
            let (count, _) = self.outgoing.head_blocks(self.outgoing.head(), &mut slices);
            if count == 0 {
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut self.transport).poll_write_vectored(cx, &slices[..count]) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => self.outgoing.advance_head_by(n),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Drives the handshake until it completes, fails, or needs more data
    /// than is currently available from the transport.
    ///
    /// `handshake_step` only moves ciphertext from the engine into the
    /// `outgoing` ring buffer; it never touches the transport. So every
    /// iteration flushes `outgoing` regardless of the status `handshake_step`
    /// returns, or a `ClientHello` produced just before a `WantRead` result
    /// would sit buffered forever.
    fn poll_drive_handshake(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Error>> {
        loop {
            let status = self.engine.handshake_step(&mut self.incoming, &mut self.outgoing);

            match self.poll_flush_outgoing(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(_)) => {
                    self.state = ConnState::Closing;
                    return Poll::Ready(Err(Error::Eread));
                }
                Poll::Pending => return Poll::Pending,
            }

            match status {
                HandshakeStatus::Done => {
                    self.state = ConnState::Open;
                    debug!("handshake done");
                    return Poll::Ready(Ok(()));
                }
                HandshakeStatus::Fatal(err) => {
                    self.state = ConnState::Closing;
                    debug!(?err, "handshake failed");
                    return Poll::Ready(Err(err));
                }
                HandshakeStatus::WantWrite => continue,
                HandshakeStatus::WantRead => match self.poll_fill_incoming(cx) {
                    Poll::Ready(Ok(0)) => {
                        self.state = ConnState::Closing;
                        return Poll::Ready(Err(Error::Ehandshake));
                    }
                    Poll::Ready(Ok(_)) => continue,
                    Poll::Ready(Err(_)) => {
                        self.state = ConnState::Closing;
                        return Poll::Ready(Err(Error::Eread));
                    }
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }

    /// Post-handshake read pump: feed any buffered ciphertext to the
    /// engine, try to decrypt into `out`, and flush whatever ciphertext
    /// that produced. Returns `Ready(Ok(0))` only on a clean peer
    /// `close_notify`; a transport EOF that arrives before `close_notify`
    /// is a truncation and is reported as `Err(Error::Eread)` instead.
    fn poll_read_app(
        &mut self,
        cx: &mut TaskContext<'_>,
        out: &mut [u8],
    ) -> Poll<Result<usize, Error>> {
        loop {
            if let Err(e) = self.engine.feed_incoming(&mut self.incoming) {
                self.state = ConnState::Closing;
                return Poll::Ready(Err(e));
            }
            let outcome = self.engine.decrypt(out);
            match self.poll_flush_outgoing(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(_)) => return Poll::Ready(Err(Error::Eread)),
                Poll::Pending => return Poll::Pending,
            }
            match outcome {
                DecryptOutcome::Bytes(n) => return Poll::Ready(Ok(n)),
                DecryptOutcome::Eof => {
                    self.state = ConnState::Closing;
                    return Poll::Ready(Ok(0));
                }
                DecryptOutcome::Fatal(err) => {
                    self.state = ConnState::Closing;
                    return Poll::Ready(Err(err));
                }
                DecryptOutcome::WantRead => match self.poll_fill_incoming(cx) {
                    // The transport closed before the engine ever reported
                    // `DecryptOutcome::Eof` (i.e. no `close_notify` was
                    // seen): a truncation, not a graceful close. Surface it
                    // as an error instead of conflating it with the clean
                    // `Ok(0)` path above.
                    Poll::Ready(Ok(0)) => {
                        self.state = ConnState::Closing;
                        return Poll::Ready(Err(Error::Eread));
                    }
                    Poll::Ready(Ok(_)) => continue,
                    Poll::Ready(Err(_)) => return Poll::Ready(Err(Error::Eread)),
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }

    /// Encrypts as much of `buf` as the engine accepts in one call, then
    /// flushes the ciphertext that produced. May consume fewer bytes than
    /// `buf.len()`, exactly like [`AsyncWrite::poll_write`].
    fn poll_write_app(
        &mut self,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, Error>> {
        if self.outgoing.len() as u64 > MAX_OUTGOING_BYTES {
            match self.poll_flush_outgoing(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(_)) => return Poll::Ready(Err(Error::Eread)),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = match self.engine.encrypt(buf) {
            Ok(n) => n,
            Err(_) => return Poll::Ready(Err(Error::Einval)),
        };
        if self.engine.drain_outgoing(&mut self.outgoing).is_err() {
            return Poll::Ready(Err(Error::Eread));
        }
        match self.poll_flush_outgoing(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(n)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Eread)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown_inner(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Error>> {
        if self.state == ConnState::Closed {
            return Poll::Ready(Ok(()));
        }
        if self.state != ConnState::Closing {
            self.state = ConnState::Closing;
            let _ = self.engine.shutdown(&mut self.outgoing);
        }
        match self.poll_flush_outgoing(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(_)) => return Poll::Ready(Err(Error::Eread)),
            Poll::Pending => return Poll::Pending,
        }
        match Pin::new(&mut self.transport).poll_shutdown(cx) {
            Poll::Ready(Ok(())) => {
                self.state = ConnState::Closed;
                trace!("connection closed");
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(_)) => {
                self.state = ConnState::Closed;
                Poll::Ready(Err(Error::Eread))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Reads decrypted application data into `buf`. Returns `Ok(0)` only
    /// on a clean peer `close_notify`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.state == ConnState::Closed {
            return Err(Error::Einval);
        }
        poll_fn(|cx| self.poll_read_app(cx, buf)).await
    }

    /// Encrypts and sends `buf`, fragmenting across as many transport
    /// writes as needed. Returns the number of bytes consumed.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.state != ConnState::Open {
            return Err(Error::Einval);
        }
        let mut written = 0;
        while written < buf.len() {
            let n = poll_fn(|cx| self.poll_write_app(cx, &buf[written..])).await?;
            if n == 0 {
                break;
            }
            written += n;
        }
        Ok(written)
    }

    /// `true` once the connection has begun (or finished) closing.
    pub fn is_closing(&self) -> bool {
        matches!(self.state, ConnState::Closing | ConnState::Closed)
    }

    /// Idempotent graceful close: sends `close_notify`, flushes it, and
    /// shuts the transport down.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        poll_fn(|cx| self.poll_shutdown_inner(cx)).await
    }

    /// Which side of the handshake this connection played.
    pub fn is_client(&self) -> bool {
        self.mode == Mode::Client
    }
}

impl<T> AsyncRead for Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.state == ConnState::Handshaking {
            match this.poll_drive_handshake(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(tls_error_to_io(e))),
                Poll::Pending => return Poll::Pending,
            }
        }
        if this.state == ConnState::Closed {
            return Poll::Ready(Ok(()));
        }
        let unfilled = buf.initialize_unfilled();
        match this.poll_read_app(cx, unfilled) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(tls_error_to_io(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> AsyncWrite for Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.state == ConnState::Handshaking {
            match this.poll_drive_handshake(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(tls_error_to_io(e))),
                Poll::Pending => return Poll::Pending,
            }
        }
        if this.state != ConnState::Open {
            return Poll::Ready(Err(tls_error_to_io(Error::Einval)));
        }
        match this.poll_write_app(cx, buf) {
            Poll::Ready(Ok(n)) => Poll::Ready(Ok(n)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(tls_error_to_io(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_flush_outgoing(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.transport).poll_flush(cx),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_shutdown_inner(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(tls_error_to_io(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn tls_error_to_io(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
