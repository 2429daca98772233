use crate::tier::{Full, ResponseTier};

/// Capability granting permission to read the request and mutate the response.
///
/// This is a zero-sized proof held by bound objects of the [`Full`] and
/// [`Regular`](crate::tier::Regular) tiers. It cannot be constructed outside
/// this crate, so response mutation is only reachable through a binder.
#[derive(Debug, Clone, Copy)]
pub struct ResponseCap {
    // Private field prevents construction outside the crate
    _private: (),
}

impl ResponseCap {
    /// Grants the capability to a response-capable tier.
    pub(crate) fn grant<T: ResponseTier>() -> Self {
        Self { _private: () }
    }
}

/// Capability granting permission to originate outbound HTTP requests.
///
/// Only the [`Full`] tier ever receives one. Event hooks and widgets cannot
/// reach the outbound client, which closes the request-forgery path from
/// request-triggered scripts.
#[derive(Debug, Clone, Copy)]
pub struct OutboundCap {
    // Private field prevents construction outside the crate
    _private: (),
}

impl OutboundCap {
    /// Grants the capability. Only callable for the full tier.
    pub(crate) fn grant(_tier: std::marker::PhantomData<Full>) -> Self {
        Self { _private: () }
    }
}
