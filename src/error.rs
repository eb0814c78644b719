//! Error types for monkey

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::ErrorKind;

use crate::hotkey::Modifier;

#[derive(Error, Debug)]
pub enum MonkeyError {
    #[error("X11 error: {0}")]
    X11(String),

    #[error("Connection to the X server closed")]
    ConnectionClosed,

    #[error("Window 0x{0:x} does not exist")]
    BadWindow(u32),

    #[error("Unknown key name: {0}")]
    UnknownKey(String),

    #[error("No modifier mask for {0}")]
    UnmappedModifier(Modifier),

    #[error("Grab failed: {0}")]
    Grab(String),

    #[error("The X server does not have the {0} extension available/enabled")]
    MissingExtension(&'static str),

    #[error("No key capture backend available (neither XRecord nor AT-SPI)")]
    NoCaptureBackend,

    #[error("Accessibility service error: {0}")]
    Accessibility(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dispatch queue is shut down")]
    QueueClosed,

    #[error("Blocking query issued from the dispatch thread")]
    Reentrant,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConnectError> for MonkeyError {
    fn from(e: ConnectError) -> Self {
        MonkeyError::X11(format!("connect failed: {}", e))
    }
}

impl From<ConnectionError> for MonkeyError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::IoError(_) => MonkeyError::ConnectionClosed,
            other => MonkeyError::X11(other.to_string()),
        }
    }
}

impl From<ReplyError> for MonkeyError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => e.into(),
            ReplyError::X11Error(e) if e.error_kind == ErrorKind::Window => {
                MonkeyError::BadWindow(e.bad_value)
            }
            ReplyError::X11Error(e) => MonkeyError::X11(format!("{:?}", e.error_kind)),
        }
    }
}

impl From<ReplyOrIdError> for MonkeyError {
    fn from(e: ReplyOrIdError) -> Self {
        match e {
            ReplyOrIdError::ConnectionError(e) => e.into(),
            ReplyOrIdError::X11Error(e) => ReplyError::X11Error(e).into(),
            ReplyOrIdError::IdsExhausted => MonkeyError::X11("X11 ids exhausted".to_string()),
        }
    }
}

impl From<zbus::Error> for MonkeyError {
    fn from(e: zbus::Error) -> Self {
        MonkeyError::Accessibility(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonkeyError>;
