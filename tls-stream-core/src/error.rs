use std::fmt;

/// The TLS-specific error taxonomy, distinct from (and non-overlapping
/// with) whatever error type the underlying transport uses.
///
/// Errors discovered while draining the pump always end up wrapped as one
/// of these variants; transport errors are kept separate as plain
/// [`std::io::Error`] and never folded into this type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// Catch-all.
    Unknown,
    /// API misuse / bad config.
    Einval,
    /// TLS handshake failed.
    Ehandshake,
    /// Verify required a peer certificate; none was presented.
    Enopeercert,
    /// The peer's certificate chain did not validate.
    Ebadpeercert,
    /// The peer's certificate did not match the expected hostname.
    Ebadpeerident,
    /// Decrypt produced a record-layer failure.
    Eread,
}

macro_rules! error_table {
    ($($variant:ident => ($code:expr, $name:expr, $message:expr)),* $(,)?) => {
        impl Error {
            /// Stable numeric code for this error, matching the source
            /// library's `UVTLS__*` constants in spirit (negative, disjoint
            /// from transport error codes).
            #[inline]
            pub const fn code(self) -> i32 {
                match self {
                    $(Self::$variant => $code,)*
                }
            }

            #[inline]
            pub const fn from_code(code: i32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Stable short name, e.g. `"EHANDSHAKE"`.
            #[inline]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            /// Human-readable message, e.g. `"handshake error"`.
            #[inline]
            pub const fn message(self) -> &'static str {
                match self {
                    $(Self::$variant => $message,)*
                }
            }
        }
    };
}

error_table!(
    Unknown => (-7, "UNKNOWN", "unknown tls error"),
    Einval => (-6, "EINVAL", "invalid argument"),
    Ehandshake => (-5, "EHANDSHAKE", "handshake error"),
    Enopeercert => (-4, "ENOPEERCERT", "no peer certificate"),
    Ebadpeercert => (-3, "EBADPEERCERT", "invalid peer certificate"),
    Ebadpeerident => (-2, "EBADPEERIDENT", "invalid peer identity"),
    Eread => (-1, "EREAD", "read error"),
);

impl Error {
    /// Writes [`Self::name`] into `buf`, nul-terminating and truncating as
    /// needed. Returns the number of bytes written including the
    /// terminator. Intended for callers embedding this crate behind an FFI
    /// boundary; ordinary Rust code should prefer [`Self::name`] directly.
    pub fn write_name(self, buf: &mut [u8]) -> usize {
        write_nul_terminated(self.name(), buf)
    }

    /// Writes [`Self::message`] into `buf`; see [`Self::write_name`].
    pub fn write_message(self, buf: &mut [u8]) -> usize {
        write_nul_terminated(self.message(), buf)
    }
}

fn write_nul_terminated(s: &str, buf: &mut [u8]) -> usize {
    if buf.is_empty() {
        return 0;
    }
    let max_payload = buf.len() - 1;
    let n = s.len().min(max_payload);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
    buf[n] = 0;
    n + 1
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for Error {}

/// Looks up the stable name for `code`. Unknown codes outside this crate's
/// taxonomy return `"unknown error"` rather than panicking, since the same
/// numeric channel is shared with the transport's own error codes (see
/// `strerror`).
#[inline]
pub fn err_name(code: i32) -> &'static str {
    Error::from_code(code).map_or("unknown error", Error::name)
}

/// Looks up the human-readable message for `code`; see [`err_name`].
#[inline]
pub fn strerror(code: i32) -> &'static str {
    Error::from_code(code).map_or("unknown error", Error::message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_code() {
        let all = [
            Error::Unknown,
            Error::Einval,
            Error::Ehandshake,
            Error::Enopeercert,
            Error::Ebadpeercert,
            Error::Ebadpeerident,
            Error::Eread,
        ];
        for err in all {
            assert_eq!(Error::from_code(err.code()), Some(err));
            assert_eq!(err_name(err.code()), err.name());
            assert_eq!(strerror(err.code()), err.message());
        }
    }

    #[test]
    fn unknown_code_does_not_panic() {
        assert_eq!(err_name(12345), "unknown error");
        assert_eq!(strerror(12345), "unknown error");
    }

    #[test]
    fn write_name_truncates_and_nul_terminates() {
        let mut buf = [0xffu8; 5];
        let n = Error::Ehandshake.write_name(&mut buf);
        assert_eq!(n, 5);
        assert_eq!(&buf, b"EHAN\0");
    }

    #[test]
    fn write_name_handles_empty_buffer() {
        let mut buf: [u8; 0] = [];
        assert_eq!(Error::Einval.write_name(&mut buf), 0);
    }
}
