//! Intercept on/off switch

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared boolean deciding whether new flows are paused at all.
///
/// Last write wins; no history is kept. Clones observe the same value.
#[derive(Debug, Clone, Default)]
pub struct InterceptToggle {
    enabled: Arc<AtomicBool>,
}

impl InterceptToggle {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Store a new value and return the previous one.
    pub fn set(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    pub fn state(&self) -> ToggleState {
        ToggleState {
            enabled: self.is_enabled(),
        }
    }
}

/// Wire form of the toggle: `{"enabled": bool}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleState {
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let toggle = InterceptToggle::default();
        let observer = toggle.clone();
        assert!(!observer.is_enabled());

        assert!(!toggle.set(true));
        assert!(observer.is_enabled());
        assert!(toggle.set(false));
        assert_eq!(observer.state(), ToggleState { enabled: false });
    }
}
