//! Passive key grabs across the window tree.
//!
//! Global bindings are grabbed on the root window. Bindings with a window
//! filter are grabbed on every window whose title or class matches, found
//! by walking the tree from the root. Every grab that went through is
//! recorded in a [`GrabSet`] so the ungrab uses exactly the same keycode
//! and masks.

use std::collections::{HashMap, HashSet};

use crate::display::{Window, XDisplay};
use crate::error::{MonkeyError, Result};
use crate::hotkey::{Binding, Hotkey, Modifier};
use crate::modmask::KeyboardLayout;
use crate::window_info::get_window_info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabRecord {
    pub keycode: u8,
    pub masks: Vec<u16>,
    /// The root child this window lives under; the root itself for root grabs.
    pub top_level: Window,
}

/// Currently held (hotkey, window) grabs.
#[derive(Debug, Default)]
pub struct GrabSet(HashMap<(Hotkey, Window), GrabRecord>);

impl GrabSet {
    pub fn contains(&self, hotkey: &Hotkey, window: Window) -> bool {
        self.0.contains_key(&(hotkey.clone(), window))
    }

    pub fn get(&self, hotkey: &Hotkey, window: Window) -> Option<&GrabRecord> {
        self.0.get(&(hotkey.clone(), window))
    }

    fn insert(&mut self, hotkey: Hotkey, window: Window, record: GrabRecord) {
        self.0.insert((hotkey, window), record);
    }

    fn remove(&mut self, hotkey: &Hotkey, window: Window) -> Option<GrabRecord> {
        self.0.remove(&(hotkey.clone(), window))
    }

    /// Windows on which `hotkey` is grabbed.
    fn windows_for(&self, hotkey: &Hotkey) -> Vec<Window> {
        self.0
            .keys()
            .filter(|(h, _)| h == hotkey)
            .map(|(_, w)| *w)
            .collect()
    }

    /// Drop every record for `window` and for the windows nested under it.
    /// The server releases the grabs itself when a window is destroyed, and
    /// only root children report their destruction.
    pub fn forget_window(&mut self, window: Window) -> usize {
        let before = self.0.len();
        self.0
            .retain(|(_, w), record| *w != window && record.top_level != window);
        before - self.0.len()
    }

    fn drain(&mut self) -> Vec<((Hotkey, Window), GrabRecord)> {
        self.0.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Owns the binding list and the grab bookkeeping. Only the dispatch
/// thread touches it.
#[derive(Debug)]
pub struct GrabManager {
    bindings: Vec<Binding>,
    grabs: GrabSet,
    super_everywhere: bool,
}

impl GrabManager {
    /// `super_everywhere` enables the desktop-shell workaround: global
    /// Super bindings are grabbed on every window, not just the root.
    pub fn new(bindings: Vec<Binding>, super_everywhere: bool) -> Self {
        GrabManager {
            bindings,
            grabs: GrabSet::default(),
            super_everywhere,
        }
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn grabs(&self) -> &GrabSet {
        &self.grabs
    }

    fn wants_every_window(&self, binding: &Binding) -> bool {
        self.super_everywhere && binding.is_global() && binding.hotkey.has_modifier(Modifier::Super)
    }

    /// Grab every known binding.
    pub fn grab_all(&mut self, display: &mut dyn XDisplay, layout: &KeyboardLayout) {
        let root = display.root();
        let bindings = self.bindings.clone();

        for binding in bindings.iter().filter(|b| b.is_global()) {
            self.grab_in(display, layout, &binding.hotkey, root, root);
        }

        let scoped: Vec<&Binding> = bindings
            .iter()
            .filter(|b| !b.is_global() || self.wants_every_window(b))
            .collect();
        if !scoped.is_empty() {
            self.grab_tree(display, layout, &scoped);
        }
        tracing::info!(grabs = self.grabs.len(), "Grabbed hotkeys");
    }

    /// Register `binding` and grab it where it applies.
    pub fn grab_binding(&mut self, display: &mut dyn XDisplay, layout: &KeyboardLayout, binding: Binding) {
        if binding.is_global() {
            let root = display.root();
            self.grab_in(display, layout, &binding.hotkey, root, root);
        }
        if !binding.is_global() || self.wants_every_window(&binding) {
            self.grab_tree(display, layout, &[&binding]);
        }
        self.bindings.push(binding);
    }

    /// Forget every binding with `hotkey` and release its grabs.
    pub fn ungrab_binding(&mut self, display: &mut dyn XDisplay, hotkey: &Hotkey) {
        self.bindings.retain(|b| &b.hotkey != hotkey);
        for window in self.grabs.windows_for(hotkey) {
            self.ungrab_hotkey(display, hotkey, window);
        }
    }

    /// Release every held grab. The binding list is kept for a regrab.
    pub fn ungrab_all(&mut self, display: &mut dyn XDisplay) {
        let held = self.grabs.drain();
        let count = held.len();
        for ((hotkey, window), record) in held {
            release(display, &hotkey, window, &record);
        }
        tracing::debug!(count, "Released all grabs");
    }

    /// A window appeared: grab whatever applies to it.
    pub fn grab_window(&mut self, display: &mut dyn XDisplay, layout: &KeyboardLayout, window: Window) {
        let info = get_window_info(&*display, Some(window), true);
        let top_level = top_level_of(&*display, window);
        let bindings = self.bindings.clone();
        for binding in &bindings {
            if binding.applies_to(&info) || self.wants_every_window(binding) {
                self.grab_in(display, layout, &binding.hotkey, window, top_level);
            }
        }
    }

    /// A window was destroyed.
    pub fn forget_window(&mut self, window: Window) {
        let dropped = self.grabs.forget_window(window);
        if dropped > 0 {
            tracing::debug!(window, dropped, "Forgot grabs of destroyed window");
        }
    }

    /// Depth-first walk from the root, each window visited once. Stack
    /// entries carry the root child they descend from.
    fn grab_tree(&mut self, display: &mut dyn XDisplay, layout: &KeyboardLayout, bindings: &[&Binding]) {
        let root = display.root();
        let mut stack = vec![(root, root)];
        let mut visited = HashSet::new();

        while let Some((window, top_level)) = stack.pop() {
            if !visited.insert(window) {
                continue;
            }

            let info = get_window_info(&*display, Some(window), false);
            for binding in bindings {
                let matched = !info.is_empty() && binding.applies_to(&info);
                if matched || self.wants_every_window(binding) {
                    self.grab_in(display, layout, &binding.hotkey, window, top_level);
                }
            }

            match display.query_tree(window) {
                Ok(tree) => stack.extend(
                    tree.children
                        .into_iter()
                        .rev()
                        .map(|child| (child, if window == root { child } else { top_level })),
                ),
                Err(e) => tracing::debug!(window, error = %e, "Skipping subtree"),
            }
        }
    }

    /// Grab one (hotkey, window) pair. Already held pairs are left alone.
    pub fn grab_hotkey(
        &mut self,
        display: &mut dyn XDisplay,
        layout: &KeyboardLayout,
        hotkey: &Hotkey,
        window: Window,
    ) {
        let top_level = top_level_of(&*display, window);
        self.grab_in(display, layout, hotkey, window, top_level);
    }

    fn grab_in(
        &mut self,
        display: &mut dyn XDisplay,
        layout: &KeyboardLayout,
        hotkey: &Hotkey,
        window: Window,
        top_level: Window,
    ) {
        if self.grabs.contains(hotkey, window) {
            tracing::debug!(%hotkey, window, "Already grabbed");
            return;
        }

        let (keycode, masks) = match grab_masks(layout, hotkey) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(%hotkey, error = %e, "Cannot grab hotkey");
                return;
            }
        };

        let mut granted = Vec::with_capacity(masks.len());
        for mask in masks {
            match display.grab_key(window, keycode, mask) {
                Ok(()) => granted.push(mask),
                Err(MonkeyError::BadWindow(_)) => {
                    tracing::debug!(%hotkey, window, "Window vanished before grab");
                    break;
                }
                Err(e) => {
                    tracing::warn!(%hotkey, window, mask, error = %e, "Grab failed");
                }
            }
        }

        if !granted.is_empty() {
            tracing::debug!(%hotkey, window, keycode, masks = ?granted, "Grabbed");
            self.grabs.insert(
                hotkey.clone(),
                window,
                GrabRecord {
                    keycode,
                    masks: granted,
                    top_level,
                },
            );
        }
    }

    /// Ungrab one pair with its recorded keycode and masks. Unknown pairs
    /// are a no-op.
    pub fn ungrab_hotkey(&mut self, display: &mut dyn XDisplay, hotkey: &Hotkey, window: Window) {
        match self.grabs.remove(hotkey, window) {
            Some(record) => release(display, hotkey, window, &record),
            None => tracing::debug!(%hotkey, window, "Not grabbed"),
        }
    }
}

/// The root child `window` lives under. A window whose ancestry cannot be
/// read counts as its own top level.
fn top_level_of(display: &dyn XDisplay, window: Window) -> Window {
    let root = display.root();
    let mut current = window;
    while current != root {
        match display.query_tree(current).map(|tree| tree.parent) {
            Ok(Some(parent)) if parent != root => current = parent,
            _ => break,
        }
    }
    current
}

fn grab_masks(layout: &KeyboardLayout, hotkey: &Hotkey) -> Result<(u8, Vec<u16>)> {
    let keycode = layout.keymap.lookup_keycode(&hotkey.key)?;
    let base = layout.masks.combined(&hotkey.modifiers)?;
    Ok((keycode, layout.masks.lock_variants(base)))
}

fn release(display: &mut dyn XDisplay, hotkey: &Hotkey, window: Window, record: &GrabRecord) {
    for mask in &record.masks {
        if let Err(e) = display.ungrab_key(window, record.keycode, *mask) {
            tracing::debug!(%hotkey, window, mask, error = %e, "Ungrab failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{Key, WindowFilter};
    use crate::testing::FakeServer;

    fn super_t() -> Hotkey {
        Hotkey::new([Modifier::Super], Key::Char('t'))
    }

    fn filtered(hotkey: Hotkey, pattern: &str) -> Binding {
        Binding {
            hotkey,
            filter: Some(WindowFilter::new(pattern).unwrap()),
            target: pattern.to_string(),
        }
    }

    fn setup(server: &FakeServer) -> (crate::testing::FakeDisplay, KeyboardLayout) {
        let display = server.display();
        let layout = KeyboardLayout::load(&display).unwrap();
        (display, layout)
    }

    #[test]
    fn test_global_binding_grabs_root_with_lock_variants() {
        let server = FakeServer::new();
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(vec![Binding::global(super_t(), "Tilix")], false);

        manager.grab_all(&mut display, &layout);

        let root = server.root();
        for mask in [64, 64 | 16, 64 | 2, 64 | 16 | 2] {
            assert!(server.has_grab(root, 28, mask), "missing mask {}", mask);
        }
        assert_eq!(server.grab_count(), 4);
        assert_eq!(
            manager.grabs().get(&super_t(), root),
            Some(&GrabRecord {
                keycode: 28,
                masks: vec![64, 64 | 16, 64 | 2, 64 | 16 | 2],
                top_level: root,
            })
        );
    }

    #[test]
    fn test_double_grab_is_noop() {
        let server = FakeServer::new();
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(Vec::new(), false);
        let root = server.root();

        manager.grab_hotkey(&mut display, &layout, &super_t(), root);
        manager.grab_hotkey(&mut display, &layout, &super_t(), root);

        assert_eq!(server.grab_calls(), 4);
        assert_eq!(manager.grabs().len(), 1);
    }

    #[test]
    fn test_grab_ungrab_restores_server_state() {
        let server = FakeServer::new();
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(Vec::new(), false);
        let root = server.root();
        let before = server.grabs();

        manager.grab_hotkey(&mut display, &layout, &super_t(), root);
        manager.ungrab_hotkey(&mut display, &super_t(), root);
        assert_eq!(server.grabs(), before);
        assert!(manager.grabs().is_empty());

        // Ungrab without a grab touches nothing.
        manager.ungrab_hotkey(&mut display, &super_t(), root);
        assert_eq!(server.ungrab_calls(), 4);
    }

    #[test]
    fn test_filtered_binding_grabs_only_matching_window() {
        let server = FakeServer::new();
        let root = server.root();
        let w1 = server.add_window(root, "Terminal", Some(("gnome-terminal", "Gnome-terminal")));
        let w2 = server.add_window(root, "Firefox", Some(("Navigator", "Firefox")));
        let (mut display, layout) = setup(&server);
        let hotkey = Hotkey::new([Modifier::Control, Modifier::Alt], Key::Char('t'));
        let mut manager = GrabManager::new(vec![filtered(hotkey.clone(), "Terminal")], false);

        manager.grab_all(&mut display, &layout);

        assert!(manager.grabs().contains(&hotkey, w1));
        assert!(!manager.grabs().contains(&hotkey, w2));
        assert!(!manager.grabs().contains(&hotkey, root));
        assert_eq!(server.grab_count(), 4);
        assert!(server.has_grab(w1, 28, 0b1100));
    }

    #[test]
    fn test_traversal_visits_each_window_once() {
        let server = FakeServer::new();
        let root = server.root();
        let a = server.add_window(root, "a", None);
        let b = server.add_window(a, "b", None);
        server.add_window(b, "c", None);
        server.add_window(root, "d", None);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(vec![filtered(super_t(), "nothing")], false);

        manager.grab_all(&mut display, &layout);

        for window in server.windows() {
            assert_eq!(server.tree_queries(window), 1, "window {}", window);
        }
    }

    #[test]
    fn test_destroyed_branch_is_skipped() {
        let server = FakeServer::new();
        let root = server.root();
        let doomed = server.add_window(root, "Terminal", None);
        let other = server.add_window(root, "Terminal 2", None);
        server.fail_tree_query(doomed);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(vec![filtered(super_t(), "Terminal")], false);

        manager.grab_all(&mut display, &layout);

        assert!(manager.grabs().contains(&super_t(), other));
    }

    #[test]
    fn test_failed_grab_does_not_abort() {
        let server = FakeServer::new();
        let root = server.root();
        server.hold_grab_elsewhere(root, 28, 64);
        let (mut display, layout) = setup(&server);
        let ctrl_q = Hotkey::new([Modifier::Control], Key::Char('q'));
        let mut manager = GrabManager::new(
            vec![Binding::global(super_t(), "x"), Binding::global(ctrl_q.clone(), "y")],
            false,
        );

        manager.grab_all(&mut display, &layout);

        assert_eq!(manager.grabs().get(&super_t(), root).unwrap().masks.len(), 3);
        assert!(manager.grabs().contains(&ctrl_q, root));
    }

    #[test]
    fn test_unknown_key_is_skipped() {
        let server = FakeServer::new();
        let (mut display, layout) = setup(&server);
        let euro = Hotkey::new([Modifier::Super], Key::Char('€'));
        let mut manager = GrabManager::new(vec![Binding::global(euro, "x")], false);

        manager.grab_all(&mut display, &layout);
        assert!(manager.grabs().is_empty());
        assert_eq!(server.grab_calls(), 0);
    }

    #[test]
    fn test_super_workaround_grabs_every_window() {
        let server = FakeServer::new();
        let root = server.root();
        let named = server.add_window(root, "Files", None);
        let unnamed = server.add_window(named, "", None);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(vec![Binding::global(super_t(), "x")], true);

        manager.grab_all(&mut display, &layout);

        assert!(manager.grabs().contains(&super_t(), root));
        assert!(manager.grabs().contains(&super_t(), named));
        assert!(manager.grabs().contains(&super_t(), unnamed));

        let late = server.add_window(root, "", None);
        manager.grab_window(&mut display, &layout, late);
        assert!(manager.grabs().contains(&super_t(), late));
    }

    #[test]
    fn test_new_window_uses_parent_info() {
        let server = FakeServer::new();
        let root = server.root();
        let frame = server.add_window(root, "Terminal", None);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(vec![filtered(super_t(), "Terminal")], false);

        let client = server.add_window(frame, "", None);
        manager.grab_window(&mut display, &layout, client);
        assert!(manager.grabs().contains(&super_t(), client));

        let stray = server.add_window(root, "Browser", None);
        manager.grab_window(&mut display, &layout, stray);
        assert!(!manager.grabs().contains(&super_t(), stray));
    }

    #[test]
    fn test_forget_and_ungrab_all() {
        let server = FakeServer::new();
        let root = server.root();
        let w = server.add_window(root, "Terminal", None);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(
            vec![filtered(super_t(), "Terminal"), Binding::global(super_t(), "x")],
            false,
        );

        manager.grab_all(&mut display, &layout);
        assert_eq!(manager.grabs().len(), 2);

        server.destroy_window(w);
        manager.forget_window(w);
        assert_eq!(manager.grabs().len(), 1);

        manager.ungrab_all(&mut display);
        assert!(manager.grabs().is_empty());
        assert_eq!(server.grab_count(), 0);
        assert_eq!(manager.bindings().len(), 2);
    }

    #[test]
    fn test_destroying_frame_forgets_nested_grabs() {
        let server = FakeServer::new();
        let root = server.root();
        let frame = server.add_window(root, "", None);
        let client = server.add_window(frame, "Terminal", None);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(vec![filtered(super_t(), "Terminal")], false);

        manager.grab_all(&mut display, &layout);
        assert_eq!(manager.grabs().get(&super_t(), client).unwrap().top_level, frame);

        server.destroy_window(frame);
        manager.forget_window(frame);
        assert!(manager.grabs().is_empty());
    }

    #[test]
    fn test_late_window_forgotten_with_its_frame() {
        let server = FakeServer::new();
        let root = server.root();
        let frame = server.add_window(root, "", None);
        let client = server.add_window(frame, "", None);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(vec![Binding::global(super_t(), "x")], true);

        manager.grab_window(&mut display, &layout, client);
        assert_eq!(manager.grabs().get(&super_t(), client).unwrap().top_level, frame);

        server.destroy_window(frame);
        manager.forget_window(frame);
        assert!(!manager.grabs().contains(&super_t(), client));
        assert!(manager.grabs().is_empty());
    }

    #[test]
    fn test_ungrab_binding_releases_every_window() {
        let server = FakeServer::new();
        let root = server.root();
        server.add_window(root, "Terminal", None);
        server.add_window(root, "Terminal", None);
        let (mut display, layout) = setup(&server);
        let mut manager = GrabManager::new(Vec::new(), false);

        manager.grab_binding(&mut display, &layout, filtered(super_t(), "Terminal"));
        assert_eq!(manager.grabs().len(), 2);

        manager.ungrab_binding(&mut display, &super_t());
        assert!(manager.grabs().is_empty());
        assert!(manager.bindings().is_empty());
        assert_eq!(server.grab_count(), 0);
    }
}
