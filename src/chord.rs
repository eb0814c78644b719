//! Turns decoded key callbacks back into [`Hotkey`]s and picks the binding
//! that should fire.

use std::collections::BTreeSet;

use crossbeam::channel::Sender;

use crate::hotkey::{Binding, Hotkey, HotkeyListener, Key, Modifier};
use crate::window_info::WindowInfo;

/// Tracks held modifiers and sends every completed chord down `tx`.
pub struct ChordListener {
    held: BTreeSet<Modifier>,
    tx: Sender<Hotkey>,
}

impl ChordListener {
    pub fn new(tx: Sender<Hotkey>) -> Self {
        ChordListener {
            held: BTreeSet::new(),
            tx,
        }
    }
}

impl HotkeyListener for ChordListener {
    fn handle_modifier_down(&mut self, modifier: Modifier) {
        if !modifier.is_lock() {
            self.held.insert(modifier);
        }
    }

    fn handle_modifier_up(&mut self, modifier: Modifier) {
        self.held.remove(&modifier);
    }

    fn handle_keypress(&mut self, key: &str) {
        let key = match Key::parse(key) {
            Ok(key) => key,
            Err(_) => {
                tracing::debug!(key, "Undecodable key");
                return;
            }
        };
        let hotkey = Hotkey::new(self.held.iter().copied(), key);
        if self.tx.send(hotkey).is_err() {
            tracing::debug!("Chord receiver gone");
        }
    }
}

/// Whether any binding for `hotkey` depends on the focused window.
pub fn needs_window_info(bindings: &[Binding], hotkey: &Hotkey) -> bool {
    bindings
        .iter()
        .any(|b| &b.hotkey == hotkey && !b.is_global())
}

/// The binding to fire: a filtered binding matching `info` wins over a
/// global one.
pub fn pick_binding<'a>(bindings: &'a [Binding], hotkey: &Hotkey, info: &WindowInfo) -> Option<&'a Binding> {
    let candidates = || bindings.iter().filter(move |b| &b.hotkey == hotkey);
    candidates()
        .find(|b| b.applies_to(info))
        .or_else(|| candidates().find(|b| b.is_global()))
}
