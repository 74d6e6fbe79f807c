use std::io;

/// String like type that occupies the same space as one usize
type TinyStr = Box<String>;

#[allow(missing_docs)]
#[derive(Debug, Display, Error)]
#[display("{:?}", self)]
#[non_exhaustive]
pub enum Error {
    /// Invalid options or a backing file that doesn't hold a valid store.
    Validation(#[error(not(source))] TinyStr),
    /// An I/O error that left the store consistent.
    Io(io::Error),
    /// An I/O error in the middle of a mutation. The store halts after returning it.
    FatalIo(io::Error),
    /// A previous fatal error halted the store, the tree may be inconsistent.
    StoreHalted,
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(Box::new(msg.into()))
    }

    /// Whether this error came from a failed mutation, after which the store refuses further work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalIo(_) | Self::StoreHalted)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match &value {
            Error::Io(i) | Error::FatalIo(i) => i.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, value)
    }
}

macro_rules! error_validation {
    ($($arg:tt)*) => {{
        let msg = ::std::fmt::format(::std::format_args!($($arg)*));
        crate::Error::Validation(msg.into())
    }}
}

macro_rules! io_invalid_data {
    ($($arg:tt)*) => {{
        let msg = ::std::fmt::format(::std::format_args!($($arg)*));
        let io_error = ::std::io::Error::new(::std::io::ErrorKind::InvalidData, msg);
        crate::Error::Io(io_error)
    }}
}

macro_rules! io_invalid_input {
    ($($arg:tt)*) => {{
        let msg = ::std::fmt::format(::std::format_args!($($arg)*));
        let io_error = ::std::io::Error::new(::std::io::ErrorKind::InvalidInput, msg);
        crate::Error::Io(io_error)
    }}
}

macro_rules! io_other {
    ($($arg:tt)*) => {{
        let msg = ::std::fmt::format(::std::format_args!($($arg)*));
        let io_error = ::std::io::Error::new(::std::io::ErrorKind::Other, msg);
        crate::Error::Io(io_error)
    }}
}

pub(crate) use error_validation;
pub(crate) use io_invalid_data;
pub(crate) use io_invalid_input;
pub(crate) use io_other;
