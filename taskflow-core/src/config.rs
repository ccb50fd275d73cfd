//! Cache policy types

use std::time::Duration;

/// Time-to-live for each logical cache. Each one is tuned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Resolved identity behind an access token.
    pub identity: Duration,
    pub notifications: Duration,
    pub workspaces: Duration,
    pub projects: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            identity: Duration::from_secs(60),
            notifications: Duration::from_secs(2 * 60),
            workspaces: Duration::from_secs(3 * 60),
            projects: Duration::from_secs(3 * 60),
        }
    }
}

/// Timer-driven refresh cadence.
///
/// Refreshing is cheap for the client but not for the hosted backend's auth
/// layer, so hidden views poll far less often than visible ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub visible: Duration,
    pub hidden: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            visible: Duration::from_secs(30),
            hidden: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals_favor_visible_views() {
        let intervals = RefreshIntervals::default();
        assert!(intervals.visible < intervals.hidden);
    }

    #[test]
    fn test_default_ttls() {
        let ttls = CacheTtls::default();
        assert_eq!(ttls.identity, Duration::from_secs(60));
        assert_eq!(ttls.notifications, Duration::from_secs(120));
        assert_eq!(ttls.workspaces, Duration::from_secs(180));
        assert_eq!(ttls.projects, Duration::from_secs(180));
    }
}
