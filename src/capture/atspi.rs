//! Key capture through the AT-SPI accessibility bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::{Deserialize, Serialize};
use zbus::blocking::{self, MessageIterator};
use zbus::zvariant::{ObjectPath, OwnedValue, Type};
use zbus::{MatchRule, message};

use super::{CaptureBackend, KeySink};
use crate::error::{MonkeyError, Result};

const A11Y_BUS_NAME: &str = "org.a11y.Bus";
const A11Y_BUS_PATH: &str = "/org/a11y/bus";
const A11Y_BUS_INTERFACE: &str = "org.a11y.Bus";

const REGISTRY_NAME: &str = "org.a11y.atspi.Registry";
const REGISTRY_PATH: &str = "/org/a11y/atspi/registry";
const REGISTRY_INTERFACE: &str = "org.a11y.atspi.Registry";
const CONTROLLER_PATH: &str = "/org/a11y/atspi/registry/deviceeventcontroller";
const CONTROLLER_INTERFACE: &str = "org.a11y.atspi.DeviceEventController";

const LISTENER_PATH: &str = "/org/monkey/keylistener";
const MOUSE_INTERFACE: &str = "org.a11y.atspi.Event.Mouse";

const KEY_PRESSED: u32 = 0;
const KEY_RELEASED: u32 = 1;

/// Event delivered to a registered `DeviceEventListener`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct DeviceEvent {
    pub kind: u32,
    pub id: i32,
    pub hw_code: i16,
    pub modifiers: i16,
    pub timestamp: i32,
    pub event_string: String,
    pub is_text: bool,
}

/// Address of the accessibility bus, asked from the session bus.
fn bus_address() -> Result<String> {
    let session = blocking::Connection::session()?;
    let reply = session.call_method(
        Some(A11Y_BUS_NAME),
        A11Y_BUS_PATH,
        Some(A11Y_BUS_INTERFACE),
        "GetAddress",
        &(),
    )?;
    Ok(reply.body().deserialize::<String>()?)
}

pub fn is_available() -> bool {
    match bus_address() {
        Ok(address) => !address.is_empty(),
        Err(e) => {
            tracing::debug!(error = %e, "Accessibility bus unavailable");
            false
        }
    }
}

/// Exported on the accessibility bus; the registry calls it for every
/// key event matching our registration.
struct KeyListener {
    sink: Arc<dyn KeySink>,
    active: Arc<AtomicBool>,
}

#[zbus::interface(name = "org.a11y.atspi.DeviceEventListener")]
impl KeyListener {
    fn notify_event(&self, event: DeviceEvent) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        deliver(&event, self.sink.as_ref());
        // Never consume the event.
        false
    }
}

fn deliver(event: &DeviceEvent, sink: &dyn KeySink) {
    let Ok(code) = u8::try_from(event.hw_code) else {
        tracing::debug!(hw_code = event.hw_code, "Keycode out of range");
        return;
    };
    match event.kind {
        KEY_PRESSED => sink.key_pressed(code),
        KEY_RELEASED => sink.key_released(code),
        other => tracing::debug!(kind = other, "Unexpected device event"),
    }
}

type MouseEventBody = (String, i32, i32, OwnedValue, HashMap<String, OwnedValue>);

/// `mouse:button` minor names look like `1p` (pressed) or `3r` (released).
fn pressed_button(kind: &str) -> Option<u8> {
    kind.trim_start_matches('b')
        .strip_suffix('p')
        .and_then(|n| n.parse().ok())
}

pub struct AtSpiCapture {
    connection: Option<blocking::Connection>,
    active: Arc<AtomicBool>,
}

impl AtSpiCapture {
    pub fn new() -> Self {
        AtSpiCapture {
            connection: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    fn register_keys(connection: &blocking::Connection, register: bool) -> Result<()> {
        let listener = ObjectPath::try_from(LISTENER_PATH).map_err(zbus::Error::from)?;
        let keys: Vec<(i32, i32, String, i32)> = Vec::new();
        let types = vec![KEY_PRESSED, KEY_RELEASED];
        // One registration per modifier mask, so no combination is missed.
        for mask in 0u32..=0xff {
            if register {
                let reply = connection.call_method(
                    Some(REGISTRY_NAME),
                    CONTROLLER_PATH,
                    Some(CONTROLLER_INTERFACE),
                    "RegisterKeystrokeListener",
                    &(&listener, &keys, mask, &types, (false, false, true)),
                )?;
                if !reply.body().deserialize::<bool>()? {
                    tracing::debug!(mask, "Keystroke registration refused");
                }
            } else {
                connection.call_method(
                    Some(REGISTRY_NAME),
                    CONTROLLER_PATH,
                    Some(CONTROLLER_INTERFACE),
                    "DeregisterKeystrokeListener",
                    &(&listener, &keys, mask, &types),
                )?;
            }
        }
        Ok(())
    }

    fn watch_mouse(&self, connection: &blocking::Connection, sink: Arc<dyn KeySink>) -> Result<()> {
        if let Err(e) = connection.call_method(
            Some(REGISTRY_NAME),
            REGISTRY_PATH,
            Some(REGISTRY_INTERFACE),
            "RegisterEvent",
            &("mouse:button",),
        ) {
            tracing::debug!(error = %e, "RegisterEvent mouse:button failed");
        }

        let rule = MatchRule::builder()
            .msg_type(message::Type::Signal)
            .interface(MOUSE_INTERFACE)?
            .member("Button")?
            .build();
        let connection = connection.clone();
        let active = Arc::clone(&self.active);

        thread::Builder::new()
            .name("atspi-mouse".into())
            .spawn(move || {
                let messages = match MessageIterator::for_match_rule(rule, &connection, None) {
                    Ok(messages) => messages,
                    Err(e) => {
                        tracing::warn!(error = %e, "Cannot watch mouse buttons");
                        return;
                    }
                };
                for message in messages {
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(message) = message else { continue };
                    match message.body().deserialize::<MouseEventBody>() {
                        Ok((kind, ..)) => {
                            if let Some(button) = pressed_button(&kind) {
                                sink.mouse_clicked(button);
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "Unexpected mouse event body"),
                    }
                }
            })?;
        Ok(())
    }
}

impl Default for AtSpiCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for AtSpiCapture {
    fn name(&self) -> &'static str {
        "atspi"
    }

    fn start(&mut self, sink: Arc<dyn KeySink>) -> Result<()> {
        let address = bus_address()?;
        self.active.store(true, Ordering::SeqCst);

        let listener = KeyListener {
            sink: Arc::clone(&sink),
            active: Arc::clone(&self.active),
        };
        let connection = blocking::connection::Builder::address(address.as_str())?
            .serve_at(LISTENER_PATH, listener)?
            .build()
            .map_err(|e| MonkeyError::Accessibility(format!("cannot join accessibility bus: {}", e)))?;

        Self::register_keys(&connection, true)?;
        self.watch_mouse(&connection, sink)?;

        tracing::info!("Capturing keys through AT-SPI");
        self.connection = Some(connection);
        Ok(())
    }

    fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(connection) = self.connection.take() {
            if let Err(e) = Self::register_keys(&connection, false) {
                tracing::debug!(error = %e, "Deregistering keystroke listener failed");
            }
        }
    }
}
