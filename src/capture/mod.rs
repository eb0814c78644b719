//! Global key capture. Two interchangeable backends feed raw keycodes into
//! a [`KeySink`]: the X RECORD extension and the AT-SPI accessibility bus.

pub mod atspi;
pub mod record;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MonkeyError, Result};

/// Where captured events go. Called from the backend's own threads.
pub trait KeySink: Send + Sync {
    fn key_pressed(&self, code: u8);

    fn key_released(&self, code: u8);

    fn mouse_clicked(&self, _button: u8) {}
}

pub trait CaptureBackend: Send {
    fn name(&self) -> &'static str;

    /// Begin forwarding events to `sink`. Returns once capture is running.
    fn start(&mut self, sink: Arc<dyn KeySink>) -> Result<()>;

    /// Stop forwarding. Safe to call more than once.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Auto,
    Record,
    Atspi,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Auto => write!(f, "auto"),
            BackendKind::Record => write!(f, "record"),
            BackendKind::Atspi => write!(f, "atspi"),
        }
    }
}

/// Which backends this session can use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub record: bool,
    pub atspi: bool,
}

impl Capabilities {
    pub fn probe(display: Option<&str>) -> Self {
        let caps = Capabilities {
            record: record::is_available(display),
            atspi: atspi::is_available(),
        };
        tracing::debug!(record = caps.record, atspi = caps.atspi, "Probed capture backends");
        caps
    }

    /// Resolve `wanted` against what is available. RECORD wins under `auto`.
    pub fn choose(&self, wanted: BackendKind) -> Result<BackendKind> {
        match wanted {
            BackendKind::Record if self.record => Ok(BackendKind::Record),
            BackendKind::Record => Err(MonkeyError::MissingExtension("RECORD")),
            BackendKind::Atspi if self.atspi => Ok(BackendKind::Atspi),
            BackendKind::Atspi => Err(MonkeyError::Accessibility(
                "accessibility bus not reachable".to_string(),
            )),
            BackendKind::Auto if self.record => Ok(BackendKind::Record),
            BackendKind::Auto if self.atspi => Ok(BackendKind::Atspi),
            BackendKind::Auto => Err(MonkeyError::NoCaptureBackend),
        }
    }
}

/// Probe, choose and build the backend in one go.
pub fn open_backend(wanted: BackendKind, display: Option<&str>) -> Result<Box<dyn CaptureBackend>> {
    let kind = Capabilities::probe(display).choose(wanted)?;
    tracing::info!(backend = %kind, "Using key capture backend");
    Ok(match kind {
        BackendKind::Atspi => Box::new(atspi::AtSpiCapture::new()),
        _ => Box::new(record::RecordCapture::new(display.map(String::from))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_prefers_record() {
        let both = Capabilities {
            record: true,
            atspi: true,
        };
        assert_eq!(both.choose(BackendKind::Auto).unwrap(), BackendKind::Record);
        assert_eq!(both.choose(BackendKind::Atspi).unwrap(), BackendKind::Atspi);

        let atspi_only = Capabilities {
            record: false,
            atspi: true,
        };
        assert_eq!(atspi_only.choose(BackendKind::Auto).unwrap(), BackendKind::Atspi);
        assert!(matches!(
            atspi_only.choose(BackendKind::Record),
            Err(MonkeyError::MissingExtension("RECORD"))
        ));
    }

    #[test]
    fn test_nothing_available_is_fatal() {
        let none = Capabilities::default();
        assert!(matches!(
            none.choose(BackendKind::Auto),
            Err(MonkeyError::NoCaptureBackend)
        ));
        assert!(none.choose(BackendKind::Atspi).is_err());
    }

    #[test]
    fn test_backend_kind_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            backend: BackendKind,
        }
        let parsed: Wrapper = toml::from_str("backend = \"atspi\"").unwrap();
        assert_eq!(parsed.backend, BackendKind::Atspi);
        assert_eq!(BackendKind::Record.to_string(), "record");
    }
}
