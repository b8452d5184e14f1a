// src/permission.rs
//! Location permission capability
//!
//! Asking the platform for location grants happens outside this crate. The
//! recorder only consumes the outcome through [`PermissionProvider`].

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single permission check or request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    /// Not granted yet, asking again may succeed
    Denied,
    /// Refused permanently or unavailable on this platform
    Blocked,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionState::Granted)
    }
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Blocked => write!(f, "blocked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Foreground,
    Background,
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionScope::Foreground => write!(f, "Foreground"),
            PermissionScope::Background => write!(f, "Background"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionStatus {
    pub foreground: PermissionState,
    pub background: PermissionState,
}

impl PermissionStatus {
    pub fn get(&self, scope: PermissionScope) -> PermissionState {
        match scope {
            PermissionScope::Foreground => self.foreground,
            PermissionScope::Background => self.background,
        }
    }
}

/// Platform hook for checking and requesting location grants
pub trait PermissionProvider: Send + Sync {
    fn check(&self) -> PermissionStatus;

    fn request(&self) -> PermissionStatus;

    /// Check current grants and request only when something is still askable.
    fn check_and_request(&self) -> PermissionStatus {
        let current = self.check();
        debug!("Permission check: {:?}", current);

        let needs_request = current.foreground == PermissionState::Denied
            || current.background == PermissionState::Denied;
        if !needs_request {
            return current;
        }

        info!("Requesting missing location permissions");
        self.request();
        let after = self.check();
        debug!("Permission state after request: {:?}", after);
        after
    }
}

/// Permissions taken from configuration.
///
/// gpsd and serial receivers need no platform grant, so the configured values
/// are what the user has allowed the recorder to do.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredPermissions {
    status: PermissionStatus,
}

impl ConfiguredPermissions {
    pub fn new(foreground: PermissionState, background: PermissionState) -> Self {
        Self {
            status: PermissionStatus {
                foreground,
                background,
            },
        }
    }

    pub fn all_granted() -> Self {
        Self::new(PermissionState::Granted, PermissionState::Granted)
    }
}

impl PermissionProvider for ConfiguredPermissions {
    fn check(&self) -> PermissionStatus {
        self.status
    }

    fn request(&self) -> PermissionStatus {
        self.status
    }
}

/// Text shown to the user when tracking cannot start for lack of permission.
pub fn guidance(scope: PermissionScope, state: PermissionState) -> Option<String> {
    match (scope, state) {
        (_, PermissionState::Granted) => None,
        (PermissionScope::Foreground, PermissionState::Denied) => Some(
            "Location access is needed to record a trip. Allow it and start again.".to_string(),
        ),
        (PermissionScope::Background, PermissionState::Denied) => Some(
            "Allow location access \"all the time\" to keep recording \
             while the app is in the background."
                .to_string(),
        ),
        (_, PermissionState::Blocked) => Some(format!(
            "{} location access is blocked. Enable it in the system settings.",
            scope
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AskOnce {
        requests: AtomicUsize,
    }

    impl PermissionProvider for AskOnce {
        fn check(&self) -> PermissionStatus {
            let background = if self.requests.load(Ordering::SeqCst) > 0 {
                PermissionState::Granted
            } else {
                PermissionState::Denied
            };
            PermissionStatus {
                foreground: PermissionState::Granted,
                background,
            }
        }

        fn request(&self) -> PermissionStatus {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.check()
        }
    }

    #[test]
    fn test_request_only_when_denied() {
        let provider = AskOnce {
            requests: AtomicUsize::new(0),
        };
        let status = provider.check_and_request();
        assert_eq!(status.background, PermissionState::Granted);
        assert_eq!(provider.requests.load(Ordering::SeqCst), 1);

        provider.check_and_request();
        assert_eq!(provider.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocked_is_not_requested() {
        let provider =
            ConfiguredPermissions::new(PermissionState::Granted, PermissionState::Blocked);
        let status = provider.check_and_request();
        assert_eq!(status.get(PermissionScope::Background), PermissionState::Blocked);
    }

    #[test]
    fn test_guidance() {
        assert!(guidance(PermissionScope::Foreground, PermissionState::Granted).is_none());
        let text = guidance(PermissionScope::Background, PermissionState::Blocked).unwrap();
        assert!(text.contains("Background"));
    }
}
