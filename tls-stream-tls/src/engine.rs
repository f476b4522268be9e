use crate::context::Context;
use rustls::{ClientConnection, ServerConnection};
use rustls_pki_types::ServerName;
use std::{
    io::{self, Read, Write},
    sync::Arc,
};
use tls_stream_core::{Error, RingBuffer};
use tracing::{debug, trace};

/// What the handshake needs next, or how it ended. Returned by
/// [`TlsEngine::handshake_step`].
#[derive(Debug)]
pub enum HandshakeStatus {
    /// More ciphertext must arrive from the peer before progress can
    /// continue.
    WantRead,
    /// Ciphertext was produced into `outgoing` and should be sent before
    /// anything else happens.
    WantWrite,
    /// The handshake completed successfully.
    Done,
    /// The handshake failed terminally.
    Fatal(Error),
}

/// The outcome of a [`TlsEngine::decrypt`] call.
#[derive(Debug)]
pub enum DecryptOutcome {
    /// `n` plaintext bytes were written into the caller's buffer.
    Bytes(usize),
    /// No plaintext is available yet; more ciphertext is needed.
    WantRead,
    /// The peer sent `close_notify`.
    Eof,
    /// The record layer reported a terminal failure.
    Fatal(Error),
}

/// Which side of the handshake a [`TlsEngine`] is playing. This is the
/// "sealed polymorphic boundary" from the design notes: one concrete
/// variant per supported crypto library side, never an erased pointer.
enum Role {
    Client(ClientConnection),
    Server(ServerConnection),
}

/// A uniform façade over `rustls`'s non-blocking connection types. The
/// Connection speaks only this interface; it never touches `rustls` types
/// directly.
pub struct TlsEngine {
    role: Role,
    debug: bool,
}

impl TlsEngine {
    pub fn client(context: &Context, hostname: &str) -> Result<Self, Error> {
        let config = context.client_config()?;
        let name = ServerName::try_from(hostname.to_string()).map_err(|_| Error::Einval)?;
        let conn = ClientConnection::new(config, name).map_err(|_| Error::Ehandshake)?;
        Ok(Self {
            role: Role::Client(conn),
            debug: context.debug_logging(),
        })
    }

    pub fn server(context: &Context) -> Result<Self, Error> {
        let config = context.server_config()?;
        let conn = ServerConnection::new(config).map_err(|_| Error::Ehandshake)?;
        Ok(Self {
            role: Role::Server(conn),
            debug: context.debug_logging(),
        })
    }

    fn is_handshaking(&self) -> bool {
        match &self.role {
            Role::Client(c) => c.is_handshaking(),
            Role::Server(c) => c.is_handshaking(),
        }
    }

    fn wants_read(&self) -> bool {
        match &self.role {
            Role::Client(c) => c.wants_read(),
            Role::Server(c) => c.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match &self.role {
            Role::Client(c) => c.wants_write(),
            Role::Server(c) => c.wants_write(),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match &mut self.role {
            Role::Client(c) => c.process_new_packets(),
            Role::Server(c) => c.process_new_packets(),
        }
    }

    fn read_tls(&mut self, incoming: &mut RingBuffer) -> io::Result<usize> {
        match &mut self.role {
            Role::Client(c) => c.read_tls(incoming),
            Role::Server(c) => c.read_tls(incoming),
        }
    }

    fn write_tls(&mut self, outgoing: &mut RingBuffer) -> io::Result<usize> {
        match &mut self.role {
            Role::Client(c) => c.write_tls(outgoing),
            Role::Server(c) => c.write_tls(outgoing),
        }
    }

    /// Drains any ciphertext the record layer has queued into `outgoing`.
    fn flush_outgoing(&mut self, outgoing: &mut RingBuffer) -> io::Result<()> {
        while self.wants_write() {
            let n = self.write_tls(outgoing)?;
            if n == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Performs as much of the handshake as currently available `incoming`
    /// bytes allow, producing `outgoing` bytes as a side effect.
    pub fn handshake_step(
        &mut self,
        incoming: &mut RingBuffer,
        outgoing: &mut RingBuffer,
    ) -> HandshakeStatus {
        if self.wants_read() && !incoming.is_empty() {
            if let Err(e) = self.read_tls(incoming) {
                debug!(error = %e, "handshake read_tls failed");
                return HandshakeStatus::Fatal(Error::Ehandshake);
            }
        }

        let state = match self.process_new_packets() {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "handshake process_new_packets failed");
                return HandshakeStatus::Fatal(classify_rustls_error(&e));
            }
        };
        let _ = state;

        if let Err(e) = self.flush_outgoing(outgoing) {
            debug!(error = %e, "handshake write_tls failed");
            return HandshakeStatus::Fatal(Error::Ehandshake);
        }

        if !self.is_handshaking() {
            if self.debug {
                trace!("handshake complete");
            }
            return HandshakeStatus::Done;
        }

        if self.wants_write() {
            HandshakeStatus::WantWrite
        } else {
            HandshakeStatus::WantRead
        }
    }

    /// Feeds `incoming` ciphertext to the record layer and tries to make
    /// post-handshake progress. Returns `Ok(true)` if application data (or
    /// a record-layer event) was processed.
    pub fn feed_incoming(&mut self, incoming: &mut RingBuffer) -> Result<bool, Error> {
        let mut made_progress = false;
        while self.wants_read() && !incoming.is_empty() {
            match self.read_tls(incoming) {
                Ok(0) => break,
                Ok(_) => made_progress = true,
                Err(e) => {
                    debug!(error = %e, "feed_incoming read_tls failed");
                    return Err(Error::Eread);
                }
            }
        }
        if made_progress {
            self.process_new_packets()
                .map_err(|e| classify_rustls_error(&e))?;
        }
        Ok(made_progress)
    }

    /// Pushes `plaintext` into the record layer, producing ciphertext as a
    /// side effect. Returns the number of bytes actually consumed.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> io::Result<usize> {
        match &mut self.role {
            Role::Client(c) => c.writer().write(plaintext),
            Role::Server(c) => c.writer().write(plaintext),
        }
    }

    /// Drains decrypted application data into `out`.
    pub fn decrypt(&mut self, out: &mut [u8]) -> DecryptOutcome {
        let result = match &mut self.role {
            Role::Client(c) => c.reader().read(out),
            Role::Server(c) => c.reader().read(out),
        };
        match result {
            Ok(0) => DecryptOutcome::Eof,
            Ok(n) => DecryptOutcome::Bytes(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => DecryptOutcome::WantRead,
            Err(e) => {
                debug!(error = %e, "decrypt failed");
                DecryptOutcome::Fatal(Error::Eread)
            }
        }
    }

    /// Initiates graceful close: queues `close_notify` and drains it into
    /// `outgoing`.
    pub fn shutdown(&mut self, outgoing: &mut RingBuffer) -> io::Result<()> {
        match &mut self.role {
            Role::Client(c) => c.send_close_notify(),
            Role::Server(c) => c.send_close_notify(),
        }
        self.flush_outgoing(outgoing)
    }

    /// Drains whatever ciphertext the engine has queued, regardless of
    /// handshake state. Called unconditionally at the end of every pump
    /// iteration.
    pub fn drain_outgoing(&mut self, outgoing: &mut RingBuffer) -> io::Result<()> {
        self.flush_outgoing(outgoing)
    }
}

/// Maps a `rustls::Error` onto this crate's taxonomy, distinguishing
/// certificate/identity failures from generic handshake failures so
/// callers awaiting a handshake result can tell them apart.
fn classify_rustls_error(err: &rustls::Error) -> Error {
    use rustls::{CertificateError as CE, Error as RE};
    match err {
        RE::InvalidCertificate(CE::NotValidForName) => Error::Ebadpeerident,
        RE::InvalidCertificate(_) => Error::Ebadpeercert,
        RE::NoCertificatesPresented => Error::Enopeercert,
        _ => Error::Ehandshake,
    }
}
