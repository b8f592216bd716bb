//! Viewport-aware notification state.
//!
//! An accepted arrival raises the "new incidents" toast only when the user is
//! scrolled away from the top; at the top the new rows are already in view.
//! Returning to the top, or clicking the toast, counts as acknowledgment.

use crate::config::DEFAULT_TOP_THRESHOLD_PX;

/// Returned when an interaction acknowledged the pending arrivals. The caller
/// clears the new-incident highlights in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledged;

#[derive(Debug, Clone)]
pub struct ViewportNotifier {
    threshold_px: f64,
    at_top: bool,
    toast_visible: bool,
}

impl Default for ViewportNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_THRESHOLD_PX)
    }
}

impl ViewportNotifier {
    pub fn new(threshold_px: f64) -> Self {
        Self {
            threshold_px,
            at_top: true,
            toast_visible: false,
        }
    }

    pub fn at_top(&self) -> bool {
        self.at_top
    }

    pub fn toast_visible(&self) -> bool {
        self.toast_visible
    }

    pub fn on_incident_applied(&mut self) {
        if !self.at_top {
            self.toast_visible = true;
        }
    }

    pub fn on_scroll(&mut self, scroll_top_px: f64) -> Option<Acknowledged> {
        self.at_top = scroll_top_px < self.threshold_px;
        if self.at_top && self.toast_visible {
            self.toast_visible = false;
            return Some(Acknowledged);
        }
        None
    }

    /// Toast click: scrolls to the top and acknowledges.
    pub fn click_toast(&mut self) -> Acknowledged {
        self.at_top = true;
        self.toast_visible = false;
        Acknowledged
    }
}
