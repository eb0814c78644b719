//! Key capture through the X RECORD extension.
//!
//! RECORD needs two connections: the data connection blocks inside
//! `RecordEnableContext` for as long as recording runs, so disabling has
//! to go through a separate control connection.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::bounded;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::record::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{KEY_PRESS_EVENT, KEY_RELEASE_EVENT, KeyPressEvent};
use x11rb::rust_connection::RustConnection;
use x11rb::x11_utils::TryParse;

use super::{CaptureBackend, KeySink};
use crate::error::{MonkeyError, Result};

/// Intercepted data sent by the server (as opposed to client requests).
const FROM_SERVER: u8 = 0;

const EVENT_SIZE: usize = 32;

pub fn is_available(display: Option<&str>) -> bool {
    match x11rb::connect(display) {
        Ok((conn, _)) => matches!(
            conn.extension_information(record::X11_EXTENSION_NAME),
            Ok(Some(_))
        ),
        Err(e) => {
            tracing::debug!(error = %e, "Cannot connect to probe RECORD");
            false
        }
    }
}

pub struct RecordCapture {
    display: Option<String>,
    control: Option<RustConnection>,
    context: Option<record::Context>,
    thread: Option<JoinHandle<()>>,
}

impl RecordCapture {
    pub fn new(display: Option<String>) -> Self {
        RecordCapture {
            display,
            control: None,
            context: None,
            thread: None,
        }
    }
}

fn key_range() -> record::Range {
    let empty = record::Range8 { first: 0, last: 0 };
    let empty_ext = record::ExtRange {
        major: empty,
        minor: record::Range16 { first: 0, last: 0 },
    };
    record::Range {
        core_requests: empty,
        core_replies: empty,
        ext_requests: empty_ext,
        ext_replies: empty_ext,
        delivered_events: empty,
        device_events: record::Range8 {
            first: KEY_PRESS_EVENT,
            last: KEY_RELEASE_EVENT,
        },
        errors: empty,
        client_started: false,
        client_died: false,
    }
}

/// Split one intercepted batch into key events and forward them.
fn forward(category: u8, client_swapped: bool, data: &[u8], sink: &dyn KeySink) {
    if category != FROM_SERVER || client_swapped {
        return;
    }
    for chunk in data.chunks_exact(EVENT_SIZE) {
        let kind = chunk[0] & 0x7f;
        if kind != KEY_PRESS_EVENT && kind != KEY_RELEASE_EVENT {
            continue;
        }
        match KeyPressEvent::try_parse(chunk) {
            Ok((event, _)) if kind == KEY_PRESS_EVENT => sink.key_pressed(event.detail),
            Ok((event, _)) => sink.key_released(event.detail),
            Err(e) => tracing::debug!(error = ?e, "Unparseable recorded event"),
        }
    }
}

impl CaptureBackend for RecordCapture {
    fn name(&self) -> &'static str {
        "record"
    }

    fn start(&mut self, sink: Arc<dyn KeySink>) -> Result<()> {
        let (control, _) = x11rb::connect(self.display.as_deref())?;
        if control
            .extension_information(record::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(MonkeyError::MissingExtension("RECORD"));
        }
        let version = control.record_query_version(1, 13)?.reply()?;
        tracing::debug!(
            major = version.major_version,
            minor = version.minor_version,
            "RECORD extension"
        );

        let context = control.generate_id()?;
        control
            .record_create_context(context, 0, &[record::CS::ALL_CLIENTS.into()], &[key_range()])?
            .check()?;

        let display = self.display.clone();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let handle = thread::Builder::new()
            .name("xrecord".into())
            .spawn(move || {
                let data = match x11rb::connect(display.as_deref()) {
                    Ok((conn, _)) => conn,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let replies = match data.record_enable_context(context) {
                    Ok(replies) => replies,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                for reply in replies {
                    match reply {
                        Ok(reply) => forward(reply.category, reply.client_swapped, &reply.data, sink.as_ref()),
                        Err(e) => {
                            tracing::warn!(error = %e, "RECORD data connection failed");
                            break;
                        }
                    }
                }
                tracing::debug!("RECORD context ended");
            })?;

        ready_rx
            .recv()
            .map_err(|_| MonkeyError::X11("RECORD thread exited during startup".to_string()))??;

        tracing::info!("Capturing keys through RECORD");
        self.control = Some(control);
        self.context = Some(context);
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        let (Some(control), Some(context)) = (self.control.take(), self.context.take()) else {
            return;
        };

        let disabled = control
            .record_disable_context(context)
            .map_err(MonkeyError::from)
            .and_then(|cookie| cookie.check().map_err(MonkeyError::from));
        if let Err(e) = control.flush() {
            tracing::debug!(error = %e, "Flush after disabling RECORD failed");
        }

        match disabled {
            Ok(()) => {
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
                let _ = control.record_free_context(context);
                let _ = control.flush();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to disable RECORD context"),
        }
    }
}
