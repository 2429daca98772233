//! Capability tier markers for bound script objects.
//!
//! This module defines zero-sized marker types that encode the trust tier of
//! a bound script object at compile time. A `BoundScript<'_, T>` can never
//! change its tier: there is no transition between markers.

use std::fmt;

/// Runtime name of a capability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Page scripts: every HTTP and validation operation
    Full,
    /// Event hook scripts: no outbound network operations
    Regular,
    /// Display widgets: no bridged operations at all
    Widget,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Full => write!(f, "full"),
            Tier::Regular => write!(f, "regular"),
            Tier::Widget => write!(f, "widget"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Full {}
    impl Sealed for super::Regular {}
    impl Sealed for super::Widget {}
}

/// Implemented by the three tier markers. Sealed.
pub trait TierMarker: sealed::Sealed {
    /// The runtime tier this marker stands for.
    const TIER: Tier;
}

/// Tiers whose scripts may read the request and mutate the response.
///
/// Implemented by [`Full`] and [`Regular`] only.
pub trait ResponseTier: TierMarker {}

/// Marker type for the full page-script tier.
#[derive(Debug, Clone, Copy)]
pub struct Full {
    _private: (),
}

/// Marker type for the restricted event-script tier.
#[derive(Debug, Clone, Copy)]
pub struct Regular {
    _private: (),
}

/// Marker type for the widget tier.
///
/// Exists only so widget scripts have an object to type-check against.
#[derive(Debug, Clone, Copy)]
pub struct Widget {
    _private: (),
}

impl TierMarker for Full {
    const TIER: Tier = Tier::Full;
}

impl TierMarker for Regular {
    const TIER: Tier = Tier::Regular;
}

impl TierMarker for Widget {
    const TIER: Tier = Tier::Widget;
}

impl ResponseTier for Full {}
impl ResponseTier for Regular {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_markers_are_zero_sized() {
        assert_eq!(std::mem::size_of::<Full>(), 0);
        assert_eq!(std::mem::size_of::<Regular>(), 0);
        assert_eq!(std::mem::size_of::<Widget>(), 0);
    }

    #[test]
    fn markers_map_to_runtime_tiers() {
        assert_eq!(Full::TIER, Tier::Full);
        assert_eq!(Regular::TIER, Tier::Regular);
        assert_eq!(Widget::TIER, Tier::Widget);
    }

    #[test]
    fn tier_display() {
        assert_eq!(Tier::Full.to_string(), "full");
        assert_eq!(Tier::Regular.to_string(), "regular");
        assert_eq!(Tier::Widget.to_string(), "widget");
    }
}
