//! In-memory X server and helpers shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::capture::{CaptureBackend, KeySink};
use crate::display::{TitleProperty, Window, WindowTree, XDisplay};
use crate::error::{MonkeyError, Result};
use crate::events::{EventSource, XEvent};
use crate::hotkey::{HotkeyListener, Modifier};
use crate::keymap::KeyboardMapping;
use crate::keysyms::*;
use crate::modmask::ModifierMapping;

const MIN_KEYCODE: u8 = 8;
const COLUMNS: usize = 4;

/// evdev-style US layout, enough keys for the tests.
pub fn us_keyboard() -> KeyboardMapping {
    let mut keysyms = vec![NO_SYMBOL; (256 - usize::from(MIN_KEYCODE)) * COLUMNS];
    let mut set = |code: u8, syms: &[Keysym]| {
        let start = usize::from(code - MIN_KEYCODE) * COLUMNS;
        keysyms[start..start + syms.len()].copy_from_slice(syms);
    };

    set(9, &[XK_ESCAPE]);
    set(23, &[XK_TAB]);
    set(24, &[0x71, 0x51]);
    set(28, &[0x74, 0x54]);
    set(36, &[XK_RETURN]);
    set(37, &[XK_CONTROL_L]);
    set(38, &[0x61, 0x41]);
    set(50, &[XK_SHIFT_L]);
    set(62, &[XK_SHIFT_R]);
    set(64, &[XK_ALT_L, XK_META_L]);
    set(65, &[0x20]);
    set(66, &[XK_CAPS_LOCK]);
    set(67, &[XK_F1]);
    set(77, &[XK_NUM_LOCK]);
    set(79, &[XK_KP_HOME, 0xffb7]);
    set(104, &[XK_KP_ENTER]);
    set(105, &[XK_CONTROL_R]);
    set(108, &[XK_ALT_R, XK_META_R]);
    set(110, &[XK_HOME]);
    set(133, &[XK_SUPER_L]);
    set(134, &[XK_SUPER_R]);

    KeyboardMapping {
        min_keycode: MIN_KEYCODE,
        keysyms_per_keycode: COLUMNS as u8,
        keysyms,
    }
}

/// Shift, Lock, Control, Mod1 (Alt), Mod2 (NumLock), Mod3, Mod4 (Super), Mod5.
pub fn us_modifier_mapping() -> ModifierMapping {
    ModifierMapping {
        keycodes_per_modifier: 2,
        keycodes: vec![50, 62, 66, 0, 37, 105, 64, 108, 77, 0, 0, 0, 133, 134, 0, 0],
    }
}

#[derive(Debug, Default)]
struct FakeWindow {
    parent: Option<Window>,
    children: Vec<Window>,
    titles: HashMap<TitleProperty, String>,
    class: Option<(String, String)>,
}

#[derive(Debug)]
struct ServerState {
    root: Window,
    next_id: Window,
    windows: HashMap<Window, FakeWindow>,
    focus: Window,
    grabs: HashSet<(Window, u8, u16)>,
    foreign_grabs: HashSet<(Window, u8, u16)>,
    grab_calls: usize,
    ungrab_calls: usize,
    tree_queries: HashMap<Window, usize>,
    broken_trees: HashSet<Window>,
    keyboard: KeyboardMapping,
    modifiers: ModifierMapping,
    led_mask: u32,
    watching_root: bool,
    flushes: usize,
    closed: bool,
    events: VecDeque<XEvent>,
    disconnected: bool,
}

/// Shared handle on the fake server; clones see the same state.
#[derive(Clone)]
pub struct FakeServer(Arc<Mutex<ServerState>>);

impl FakeServer {
    pub fn new() -> Self {
        let root = 1;
        let mut windows = HashMap::new();
        windows.insert(root, FakeWindow::default());
        FakeServer(Arc::new(Mutex::new(ServerState {
            root,
            next_id: 0x40_0001,
            windows,
            focus: root,
            grabs: HashSet::new(),
            foreign_grabs: HashSet::new(),
            grab_calls: 0,
            ungrab_calls: 0,
            tree_queries: HashMap::new(),
            broken_trees: HashSet::new(),
            keyboard: us_keyboard(),
            modifiers: us_modifier_mapping(),
            led_mask: 0,
            watching_root: false,
            flushes: 0,
            closed: false,
            events: VecDeque::new(),
            disconnected: false,
        })))
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.0.lock().unwrap()
    }

    pub fn display(&self) -> FakeDisplay {
        FakeDisplay(self.clone())
    }

    pub fn events(&self) -> FakeEvents {
        FakeEvents(self.clone())
    }

    pub fn root(&self) -> Window {
        self.state().root
    }

    /// New child of `parent`. An empty title sets no title property.
    pub fn add_window(&self, parent: Window, title: &str, class: Option<(&str, &str)>) -> Window {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;

        let mut window = FakeWindow {
            parent: Some(parent),
            class: class.map(|(i, c)| (i.to_string(), c.to_string())),
            ..FakeWindow::default()
        };
        if !title.is_empty() {
            window.titles.insert(TitleProperty::Name, title.to_string());
        }
        state.windows.insert(id, window);
        if let Some(p) = state.windows.get_mut(&parent) {
            p.children.push(id);
        }
        id
    }

    pub fn set_title(&self, window: Window, property: TitleProperty, title: &str) {
        if let Some(w) = self.state().windows.get_mut(&window) {
            w.titles.insert(property, title.to_string());
        }
    }

    pub fn set_focus(&self, window: Window) {
        self.state().focus = window;
    }

    /// Removes the window and its subtree, along with their grabs.
    pub fn destroy_window(&self, window: Window) {
        let mut state = self.state();
        let mut doomed = vec![window];
        while let Some(w) = doomed.pop() {
            if let Some(removed) = state.windows.remove(&w) {
                doomed.extend(removed.children);
                if let Some(parent) = removed.parent.and_then(|p| state.windows.get_mut(&p)) {
                    parent.children.retain(|c| *c != w);
                }
            }
            state.grabs.retain(|(gw, _, _)| *gw != w);
        }
    }

    pub fn windows(&self) -> Vec<Window> {
        self.state().windows.keys().copied().collect()
    }

    pub fn fail_tree_query(&self, window: Window) {
        self.state().broken_trees.insert(window);
    }

    /// Another client holds this combination; our grab gets BadAccess.
    pub fn hold_grab_elsewhere(&self, window: Window, keycode: u8, mask: u16) {
        self.state().foreign_grabs.insert((window, keycode, mask));
    }

    pub fn set_keyboard(&self, keyboard: KeyboardMapping, modifiers: ModifierMapping) {
        let mut state = self.state();
        state.keyboard = keyboard;
        state.modifiers = modifiers;
    }

    pub fn set_led_mask(&self, led_mask: u32) {
        self.state().led_mask = led_mask;
    }

    pub fn push_event(&self, event: XEvent) {
        self.state().events.push_back(event);
    }

    pub fn disconnect(&self) {
        self.state().disconnected = true;
    }

    pub fn grabs(&self) -> HashSet<(Window, u8, u16)> {
        self.state().grabs.clone()
    }

    pub fn has_grab(&self, window: Window, keycode: u8, mask: u16) -> bool {
        self.state().grabs.contains(&(window, keycode, mask))
    }

    pub fn grab_count(&self) -> usize {
        self.state().grabs.len()
    }

    pub fn grab_calls(&self) -> usize {
        self.state().grab_calls
    }

    pub fn ungrab_calls(&self) -> usize {
        self.state().ungrab_calls
    }

    pub fn tree_queries(&self, window: Window) -> usize {
        self.state().tree_queries.get(&window).copied().unwrap_or(0)
    }

    pub fn watching_root(&self) -> bool {
        self.state().watching_root
    }

    pub fn flushes(&self) -> usize {
        self.state().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

pub struct FakeDisplay(FakeServer);

impl FakeDisplay {
    fn open(&self) -> Result<MutexGuard<'_, ServerState>> {
        let state = self.0.state();
        if state.closed {
            return Err(MonkeyError::ConnectionClosed);
        }
        Ok(state)
    }
}

impl XDisplay for FakeDisplay {
    fn root(&self) -> Window {
        self.0.root()
    }

    fn query_tree(&self, window: Window) -> Result<WindowTree> {
        let mut state = self.open()?;
        *state.tree_queries.entry(window).or_default() += 1;
        if state.broken_trees.contains(&window) {
            return Err(MonkeyError::BadWindow(window));
        }
        let w = state.windows.get(&window).ok_or(MonkeyError::BadWindow(window))?;
        Ok(WindowTree {
            parent: w.parent,
            children: w.children.clone(),
        })
    }

    fn grab_key(&mut self, window: Window, keycode: u8, mask: u16) -> Result<()> {
        let mut state = self.open()?;
        state.grab_calls += 1;
        if !state.windows.contains_key(&window) {
            return Err(MonkeyError::BadWindow(window));
        }
        let key = (window, keycode, mask);
        if state.foreign_grabs.contains(&key) || !state.grabs.insert(key) {
            return Err(MonkeyError::Grab("BadAccess".to_string()));
        }
        Ok(())
    }

    fn ungrab_key(&mut self, window: Window, keycode: u8, mask: u16) -> Result<()> {
        let mut state = self.open()?;
        state.ungrab_calls += 1;
        state.grabs.remove(&(window, keycode, mask));
        Ok(())
    }

    fn title(&self, window: Window, property: TitleProperty) -> Result<Option<String>> {
        let state = self.open()?;
        let w = state.windows.get(&window).ok_or(MonkeyError::BadWindow(window))?;
        Ok(w.titles.get(&property).cloned())
    }

    fn wm_class(&self, window: Window) -> Result<Option<(String, String)>> {
        let state = self.open()?;
        let w = state.windows.get(&window).ok_or(MonkeyError::BadWindow(window))?;
        Ok(w.class.clone())
    }

    fn input_focus(&self) -> Result<Window> {
        Ok(self.open()?.focus)
    }

    fn keyboard_mapping(&self) -> Result<KeyboardMapping> {
        Ok(self.open()?.keyboard.clone())
    }

    fn modifier_mapping(&self) -> Result<ModifierMapping> {
        Ok(self.open()?.modifiers.clone())
    }

    fn led_mask(&self) -> Result<u32> {
        Ok(self.open()?.led_mask)
    }

    fn watch_root(&mut self) -> Result<()> {
        self.open()?.watching_root = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.open()?.flushes += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.0.state();
        if !state.closed {
            state.closed = true;
            state.grabs.clear();
        }
    }
}

pub struct FakeEvents(FakeServer);

impl EventSource for FakeEvents {
    fn drain(&mut self) -> Result<Vec<XEvent>> {
        let mut state = self.0.state();
        if state.disconnected {
            return Err(MonkeyError::ConnectionClosed);
        }
        Ok(state.events.drain(..).collect())
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool> {
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(!self.0.state().events.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ModifierDown(Modifier),
    ModifierUp(Modifier),
    Key(String),
    Click(u8),
}

/// Listener that records every callback.
#[derive(Clone, Default)]
pub struct RecordingListener(Arc<Mutex<Vec<Call>>>);

impl RecordingListener {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }
}

impl HotkeyListener for RecordingListener {
    fn handle_modifier_down(&mut self, modifier: Modifier) {
        self.0.lock().unwrap().push(Call::ModifierDown(modifier));
    }

    fn handle_modifier_up(&mut self, modifier: Modifier) {
        self.0.lock().unwrap().push(Call::ModifierUp(modifier));
    }

    fn handle_keypress(&mut self, key: &str) {
        self.0.lock().unwrap().push(Call::Key(key.to_string()));
    }

    fn handle_mouse_click(&mut self, button: u8) {
        self.0.lock().unwrap().push(Call::Click(button));
    }
}

/// Capture backend driven by hand from the test.
#[derive(Clone, Default)]
pub struct FakeCapture {
    sink: Arc<Mutex<Option<Arc<dyn KeySink>>>>,
    stopped: Arc<Mutex<bool>>,
}

impl FakeCapture {
    pub fn press(&self, code: u8) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.key_pressed(code);
        }
    }

    pub fn release(&self, code: u8) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.key_released(code);
        }
    }

    pub fn click(&self, button: u8) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.mouse_clicked(button);
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap()
    }
}

impl CaptureBackend for FakeCapture {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn start(&mut self, sink: Arc<dyn KeySink>) -> Result<()> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        *self.stopped.lock().unwrap() = true;
        self.sink.lock().unwrap().take();
    }
}
