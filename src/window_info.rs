//! Title and class lookup for a window, walking up to its parents when the
//! window itself carries no name.

use serde::Serialize;

use crate::display::{TitleProperty, Window, XDisplay};
use crate::error::{MonkeyError, Result};

/// Class marker of the input-only proxy windows some toolkits put focus on.
const FOCUS_PROXY: &str = "FocusProxy";

/// Snapshot of a window's identity. Never cached: titles change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowInfo {
    pub title: String,
    pub class: String,
}

impl WindowInfo {
    pub fn new(title: impl Into<String>, class: impl Into<String>) -> Self {
        WindowInfo {
            title: title.into(),
            class: class.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.class.is_empty()
    }

    fn is_complete(&self) -> bool {
        !self.title.is_empty() && !self.class.is_empty()
    }

    /// Fill in whatever is still missing from `other`.
    fn merge(&mut self, other: WindowInfo) {
        if self.title.is_empty() {
            self.title = other.title;
        }
        if self.class.is_empty() {
            self.class = other.class;
        }
    }
}

/// Resolve `window` (the input focus when `None`). Errors, including a
/// window that vanished mid-walk, yield empty info.
pub fn get_window_info(display: &dyn XDisplay, window: Option<Window>, traverse: bool) -> WindowInfo {
    match resolve(display, window, traverse) {
        Ok(info) => info,
        Err(MonkeyError::BadWindow(w)) => {
            tracing::debug!(window = w, "Window vanished while reading its info");
            WindowInfo::default()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read window info");
            WindowInfo::default()
        }
    }
}

fn resolve(display: &dyn XDisplay, window: Option<Window>, traverse: bool) -> Result<WindowInfo> {
    let mut window = match window {
        Some(window) => window,
        None => display.input_focus()?,
    };
    let root = display.root();
    let mut info = WindowInfo::default();

    loop {
        let own = read_own(display, window)?;

        // A proxy stands in for its parent: drop what was merged so far.
        if own.class.contains(FOCUS_PROXY) {
            return match display.query_tree(window)?.parent {
                Some(parent) => resolve(display, Some(parent), false),
                None => Ok(WindowInfo::default()),
            };
        }
        info.merge(own);

        if traverse && !info.is_complete() {
            if let Some(parent) = display.query_tree(window)?.parent.filter(|p| *p != root) {
                window = parent;
                continue;
            }
        }

        return Ok(info);
    }
}

/// Title and class set on `window` itself.
fn read_own(display: &dyn XDisplay, window: Window) -> Result<WindowInfo> {
    let mut title = String::new();
    for property in TitleProperty::ORDER {
        if let Some(value) = display.title(window, property)? {
            if !value.is_empty() {
                title = value;
                break;
            }
        }
    }

    let class = display
        .wm_class(window)?
        .map(|(instance, class)| format!("{}.{}", instance, class))
        .unwrap_or_default();

    Ok(WindowInfo { title, class })
}
