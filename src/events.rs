//! Window structure notifications: created and destroyed windows, keymap
//! changes. The listener thread only classifies and forwards; the actual
//! grab work happens on the dispatch thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::display::Window;
use crate::error::{MonkeyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XEvent {
    Created(Window),
    Destroyed(Window),
    MappingChanged,
    Other,
}

pub trait EventSource: Send {
    /// Everything queued right now, without blocking.
    fn drain(&mut self) -> Result<Vec<XEvent>>;

    /// Block until more events may be readable or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<bool>;
}

/// Receives classified notifications, one batch at a time.
pub trait EventSink: Send {
    fn window_created(&self, window: Window);

    fn window_destroyed(&self, window: Window);

    /// A keymap change was seen. Returns how long to let the burst settle
    /// before [`EventSink::keymap_changed`], or `None` when a remap is
    /// already pending and the notification should be dropped.
    fn keymap_change_started(&self) -> Option<Duration>;

    /// The burst has settled; remap now.
    fn keymap_changed(&self);
}

/// One drained cycle after classification.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Batch {
    pub created: Vec<Window>,
    pub destroyed: Vec<Window>,
    pub keymap_changed: bool,
}

impl Batch {
    /// Windows created and destroyed in the same cycle count only as
    /// destroyed.
    pub fn classify(events: &[XEvent]) -> Batch {
        let mut batch = Batch::default();
        for event in events {
            match *event {
                XEvent::Created(w) => batch.created.push(w),
                XEvent::Destroyed(w) => batch.destroyed.push(w),
                XEvent::MappingChanged => batch.keymap_changed = true,
                XEvent::Other => {}
            }
        }
        let destroyed = batch.destroyed.clone();
        batch.created.retain(|w| !destroyed.contains(w));
        batch
    }

    fn deliver_windows(&self, sink: &dyn EventSink) {
        for window in &self.created {
            sink.window_created(*window);
        }
        for window in &self.destroyed {
            sink.window_destroyed(*window);
        }
    }
}

/// Runs until `shutdown` is set. Returns an error only when the source
/// fails, which means the connection is gone.
pub fn listen(
    source: &mut dyn EventSource,
    sink: &dyn EventSink,
    shutdown: &AtomicBool,
    poll_timeout: Duration,
) -> Result<()> {
    // Window events drained while settling a keymap burst.
    let mut carried = Vec::new();

    loop {
        let mut events = std::mem::take(&mut carried);
        events.extend(source.drain()?);

        if !events.is_empty() {
            let batch = Batch::classify(&events);
            batch.deliver_windows(sink);

            if batch.keymap_changed {
                if let Some(settle) = sink.keymap_change_started() {
                    thread::sleep(settle);
                    // Mapping notifications that arrived meanwhile belong
                    // to the same remap.
                    carried = source
                        .drain()?
                        .into_iter()
                        .filter(|e| *e != XEvent::MappingChanged)
                        .collect();
                    sink.keymap_changed();
                }
            }
        }

        if !carried.is_empty() {
            continue;
        }
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        source.wait(poll_timeout)?;
    }
}

/// Spawn the listener thread. Losing the X connection is unrecoverable:
/// the process exits with status 1.
pub fn spawn_listener(
    mut source: Box<dyn EventSource>,
    sink: Box<dyn EventSink>,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("x11-events".into())
        .spawn(move || {
            match listen(source.as_mut(), sink.as_ref(), &shutdown, poll_timeout) {
                Ok(()) => tracing::debug!("Event listener stopped"),
                Err(MonkeyError::ConnectionClosed) => {
                    tracing::error!("Lost connection to the X server, exiting");
                    std::process::exit(1);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event listener failed, exiting");
                    std::process::exit(1);
                }
            }
        })?;
    Ok(handle)
}

/// Coalesces keymap-change bursts into one remap. While a remap is
/// pending every further notification is ignored.
#[derive(Debug, Clone)]
pub struct RemapGate {
    busy: Arc<AtomicBool>,
    debounce: Duration,
}

impl RemapGate {
    pub fn new(debounce: Duration) -> Self {
        RemapGate {
            busy: Arc::new(AtomicBool::new(false)),
            debounce,
        }
    }

    /// Claim the gate. Returns the debounce delay to wait before remapping,
    /// or `None` when a remap is already pending.
    pub fn begin(&self) -> Option<Duration> {
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::debug!("Keymap change ignored, remap pending");
            return None;
        }
        Some(self.debounce)
    }

    /// Back to idle. Called by the remap job when it finishes.
    pub fn finish(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}
