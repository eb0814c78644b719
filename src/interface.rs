//! The X11 hotkey interface: owns the dispatch worker, the structure
//! listener and the capture backend, and exposes the queued operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{self, CaptureBackend, KeySink};
use crate::config::Config;
use crate::dispatch::{DispatchQueue, Dispatcher};
use crate::display::{Window, X11Session, XDisplay};
use crate::error::Result;
use crate::events::{self, EventSink, EventSource, RemapGate};
use crate::grab::GrabManager;
use crate::hotkey::{Binding, Hotkey, HotkeyListener, Key, Modifier, ModifierState, SharedModifierState};
use crate::modmask::KeyboardLayout;
use crate::window_info::{WindowInfo, get_window_info};

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub super_workaround: bool,
    pub debounce: Duration,
    pub poll_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            super_workaround: false,
            debounce: Duration::from_millis(200),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// Everything the dispatch worker owns.
pub struct XState {
    display: Box<dyn XDisplay>,
    layout: KeyboardLayout,
    grabs: GrabManager,
    modifiers: ModifierState,
    shared_modifiers: SharedModifierState,
    listener: Box<dyn HotkeyListener>,
}

impl XState {
    fn initial_grab(&mut self) -> Result<()> {
        self.display.watch_root()?;
        self.grabs.grab_all(self.display.as_mut(), &self.layout);
        self.display.flush()
    }

    /// Re-read the keyboard, then grab everything again with the new codes.
    fn rebuild(&mut self) -> Result<()> {
        self.layout = KeyboardLayout::load(self.display.as_ref())?;
        self.display.watch_root()?;
        self.grabs.grab_all(self.display.as_mut(), &self.layout);
        self.display.flush()?;
        tracing::info!("Keyboard mapping changed, hotkeys regrabbed");
        Ok(())
    }

    fn key_pressed(&mut self, code: u8) {
        match self.layout.keymap.modifier_for(code) {
            Some(modifier) => {
                self.modifiers.press(modifier);
                self.shared_modifiers.store(self.modifiers);
                self.listener.handle_modifier_down(modifier);
            }
            None => {
                let numlock = self.modifiers.is_active(Modifier::NumLock);
                let key = self.layout.keymap.lookup_string(code, false, numlock, false);
                self.listener.handle_keypress(&key);
            }
        }
    }

    fn key_released(&mut self, code: u8) {
        if let Some(modifier) = self.layout.keymap.modifier_for(code) {
            self.modifiers.release(modifier);
            self.shared_modifiers.store(self.modifiers);
            self.listener.handle_modifier_up(modifier);
        }
    }
}

/// Window queries that block on the dispatch worker. Cloneable and usable
/// from any thread except the worker itself.
#[derive(Clone)]
pub struct WindowQueries {
    dispatcher: Dispatcher<XState>,
}

impl WindowQueries {
    /// Info for `window`, or the focused window. Empty on any failure.
    pub fn get_window_info(&self, window: Option<Window>, traverse: bool) -> WindowInfo {
        if self.dispatcher.is_worker_thread() {
            tracing::warn!("Window query from a listener callback would deadlock, returning nothing");
            return WindowInfo::default();
        }
        self.dispatcher
            .query(move |state| get_window_info(state.display.as_ref(), window, traverse))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Window query failed");
                WindowInfo::default()
            })
    }

    pub fn get_window_title(&self, window: Option<Window>, traverse: bool) -> String {
        self.get_window_info(window, traverse).title
    }

    pub fn get_window_class(&self, window: Option<Window>, traverse: bool) -> String {
        self.get_window_info(window, traverse).class
    }
}

/// Bridges capture backends onto the dispatch worker.
struct KeyForwarder {
    dispatcher: Dispatcher<XState>,
}

impl KeyForwarder {
    fn forward(&self, job: impl FnOnce(&mut XState) + Send + 'static) {
        let queued = self.dispatcher.submit(move |state| {
            job(state);
            Ok(())
        });
        if queued.is_err() {
            tracing::debug!("Dropped key event after shutdown");
        }
    }
}

impl KeySink for KeyForwarder {
    fn key_pressed(&self, code: u8) {
        self.forward(move |state| state.key_pressed(code));
    }

    fn key_released(&self, code: u8) {
        self.forward(move |state| state.key_released(code));
    }

    fn mouse_clicked(&self, button: u8) {
        self.forward(move |state| state.listener.handle_mouse_click(button));
    }
}

/// Bridges the structure listener onto the dispatch worker.
struct GrabUpdater {
    dispatcher: Dispatcher<XState>,
    remap: RemapGate,
}

impl GrabUpdater {
    fn submit(&self, job: impl FnOnce(&mut XState) -> Result<()> + Send + 'static) {
        if let Err(e) = self.dispatcher.submit(job) {
            tracing::debug!(error = %e, "Dropped window event");
        }
    }
}

impl EventSink for GrabUpdater {
    fn window_created(&self, window: Window) {
        self.submit(move |state| {
            state.grabs.grab_window(state.display.as_mut(), &state.layout, window);
            state.display.flush()
        });
    }

    fn window_destroyed(&self, window: Window) {
        self.submit(move |state| {
            state.grabs.forget_window(window);
            Ok(())
        });
    }

    fn keymap_change_started(&self) -> Option<Duration> {
        self.remap.begin()
    }

    fn keymap_changed(&self) {
        self.submit(|state| {
            state.grabs.ungrab_all(state.display.as_mut());
            Ok(())
        });
        let gate = self.remap.clone();
        self.submit(move |state| {
            let result = state.rebuild();
            gate.finish();
            result
        });
    }
}

pub struct XInterface {
    queue: DispatchQueue<XState>,
    capture: Box<dyn CaptureBackend>,
    shutdown: Arc<AtomicBool>,
    listener_thread: Option<JoinHandle<()>>,
    modifiers: SharedModifierState,
    stopped: bool,
}

impl XInterface {
    /// Connect to the X server named in `config`, pick a capture backend
    /// and start grabbing `bindings`.
    pub fn start(
        config: &Config,
        bindings: Vec<Binding>,
        listener: Box<dyn HotkeyListener>,
    ) -> Result<Self> {
        let capture = capture::open_backend(config.backend, config.display.as_deref())?;
        let session = X11Session::open(config.display.as_deref())?;
        let events = session.events()?;
        let options = Options {
            super_workaround: config.super_workaround(),
            debounce: config.debounce(),
            poll_timeout: config.poll_timeout(),
        };
        Self::start_with(
            Box::new(session),
            Box::new(events),
            capture,
            bindings,
            listener,
            options,
        )
    }

    /// Start on explicit parts. The display must already be connected.
    pub fn start_with(
        display: Box<dyn XDisplay>,
        events: Box<dyn EventSource>,
        capture: Box<dyn CaptureBackend>,
        bindings: Vec<Binding>,
        listener: Box<dyn HotkeyListener>,
        options: Options,
    ) -> Result<Self> {
        let layout = KeyboardLayout::load(display.as_ref())?;
        let modifiers = ModifierState::from_led_mask(display.led_mask()?);
        let shared_modifiers = SharedModifierState::default();
        shared_modifiers.store(modifiers);

        let state = XState {
            display,
            layout,
            grabs: GrabManager::new(bindings, options.super_workaround),
            modifiers,
            shared_modifiers: shared_modifiers.clone(),
            listener,
        };
        let queue = DispatchQueue::start("x11-dispatch", state)?;
        let dispatcher = queue.dispatcher().clone();
        dispatcher.submit(XState::initial_grab)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let updater = GrabUpdater {
            dispatcher: dispatcher.clone(),
            remap: RemapGate::new(options.debounce),
        };
        let listener_thread = events::spawn_listener(
            events,
            Box::new(updater),
            Arc::clone(&shutdown),
            options.poll_timeout,
        )?;

        let mut interface = XInterface {
            queue,
            capture,
            shutdown,
            listener_thread: Some(listener_thread),
            modifiers: shared_modifiers,
            stopped: false,
        };
        // On failure the returned error drops `interface`, which shuts
        // the worker and listener down again.
        interface
            .capture
            .start(Arc::new(KeyForwarder { dispatcher }))?;
        tracing::info!(backend = interface.capture.name(), "Hotkey interface running");
        Ok(interface)
    }

    fn dispatcher(&self) -> &Dispatcher<XState> {
        self.queue.dispatcher()
    }

    pub fn queries(&self) -> WindowQueries {
        WindowQueries {
            dispatcher: self.dispatcher().clone(),
        }
    }

    /// Add a binding and grab it wherever it applies.
    pub fn grab_binding(&self, binding: Binding) -> Result<()> {
        self.dispatcher().submit(move |state| {
            state.grabs.grab_binding(state.display.as_mut(), &state.layout, binding);
            state.display.flush()
        })
    }

    /// Remove every binding for `hotkey` and release its grabs.
    pub fn ungrab_binding(&self, hotkey: Hotkey) -> Result<()> {
        self.dispatcher().submit(move |state| {
            state.grabs.ungrab_binding(state.display.as_mut(), &hotkey);
            state.display.flush()
        })
    }

    pub fn handle_keypress(&self, code: u8) -> Result<()> {
        self.dispatcher().submit(move |state| {
            state.key_pressed(code);
            Ok(())
        })
    }

    pub fn handle_keyrelease(&self, code: u8) -> Result<()> {
        self.dispatcher().submit(move |state| {
            state.key_released(code);
            Ok(())
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.dispatcher().submit(|state| state.display.flush())
    }

    /// Keycode for `key` in the current layout.
    pub fn lookup_keycode(&self, key: Key) -> Result<u8> {
        self.dispatcher()
            .query(move |state| state.layout.keymap.lookup_keycode(&key))?
    }

    pub fn get_window_info(&self, window: Option<Window>, traverse: bool) -> WindowInfo {
        self.queries().get_window_info(window, traverse)
    }

    pub fn get_window_title(&self, window: Option<Window>, traverse: bool) -> String {
        self.queries().get_window_title(window, traverse)
    }

    pub fn get_window_class(&self, window: Option<Window>, traverse: bool) -> String {
        self.queries().get_window_class(window, traverse)
    }

    pub fn modifier_state(&self) -> ModifierState {
        self.modifiers.load()
    }

    /// Stop capture, stop the listener, drain the queue and close the
    /// connection. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        tracing::info!("Shutting down hotkey interface");

        self.capture.stop();
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener_thread.take() {
            if handle.join().is_err() {
                tracing::error!("Event listener panicked");
            }
        }

        if let Some(mut state) = self.queue.shutdown() {
            if let Err(e) = state.display.flush() {
                tracing::debug!(error = %e, "Final flush failed");
            }
            state.display.close();
        }
    }
}

impl Drop for XInterface {
    fn drop(&mut self) {
        self.shutdown();
    }
}
