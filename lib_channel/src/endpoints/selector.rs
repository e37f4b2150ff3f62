//! # Endpoint Selector
//!
//! Decides which endpoint a channel should try next. There are exactly two
//! policies and they are modelled as a closed enum so every call site matches
//! on both:
//!
//! - **`RoundRobin`** walks the list in order and wraps around. It never asks
//!   for a premature switch.
//! - **`PreferredHost`** ping-pongs between the preferred endpoint and the
//!   alternates: every alternate attempt is followed by another try on the
//!   preferred endpoint, and while the channel sits on an alternate it reports
//!   that a premature switch back is warranted.

use crate::endpoints::{Endpoint, EndpointList};
use crate::error::ValidationError;
use crate::fallback::policy::FallbackPolicy;

/// Cycles through the endpoint list in insertion order.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    endpoints: EndpointList,
    current: usize,
}

impl RoundRobin {
    /// Starts on the first endpoint.
    pub fn new(endpoints: EndpointList) -> Self {
        Self {
            endpoints,
            current: 0,
        }
    }

    fn next_index(&self) -> usize {
        (self.current + 1) % self.endpoints.len()
    }
}

/// Favors one endpoint and returns to it after every alternate.
#[derive(Debug, Clone)]
pub struct PreferredHost {
    endpoints: EndpointList,
    preferred: usize,
    current: usize,
    last_alternate: Option<usize>,
}

impl PreferredHost {
    /// Starts on the preferred endpoint. Fails if `preferred_index` is negative
    /// or past the end of the list.
    pub fn new(endpoints: EndpointList, preferred_index: i32) -> Result<Self, ValidationError> {
        let preferred = endpoints.check_index(preferred_index)?;
        Ok(Self {
            endpoints,
            preferred,
            current: preferred,
            last_alternate: None,
        })
    }

    /// Index of the preferred endpoint.
    pub fn preferred_index(&self) -> usize {
        self.preferred
    }

    fn next_index(&self) -> usize {
        if self.endpoints.len() == 1 || self.current != self.preferred {
            return self.preferred;
        }
        self.next_alternate()
    }

    // Alternates are visited in increasing index order, lowest first, wrapping
    // after the highest one.
    fn next_alternate(&self) -> usize {
        let len = self.endpoints.len();
        let start = self.last_alternate.map_or(0, |last| last + 1);
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&index| index != self.preferred)
            .unwrap_or(self.preferred)
    }

    fn move_to(&mut self, index: usize) {
        if index != self.preferred {
            self.last_alternate = Some(index);
        }
        self.current = index;
    }
}

/// # Endpoint Selector
///
/// The selection policy a channel runs with.
#[derive(Debug, Clone)]
pub enum EndpointSelector {
    /// Plain in-order rotation.
    RoundRobin(RoundRobin),
    /// Preferred endpoint with alternates.
    PreferredHost(PreferredHost),
}

impl EndpointSelector {
    /// Builds the selector a policy calls for: `PreferredHost` when the policy is
    /// enabled, `RoundRobin` otherwise. The preferred index is validated in both
    /// cases so a disabled policy cannot carry a bad index either.
    pub fn from_policy(
        endpoints: EndpointList,
        policy: &FallbackPolicy,
    ) -> Result<Self, ValidationError> {
        endpoints.check_index(policy.connection_list_index)?;
        if policy.enabled {
            Ok(Self::PreferredHost(PreferredHost::new(
                endpoints,
                policy.connection_list_index,
            )?))
        } else {
            Ok(Self::RoundRobin(RoundRobin::new(endpoints)))
        }
    }

    /// The endpoint the channel is (or will be) connected to.
    pub fn current(&self) -> &Endpoint {
        &self.endpoints()[self.current_index()]
    }

    /// The endpoint `switch_to_next` would move to. Does not change state.
    pub fn next(&self) -> &Endpoint {
        &self.endpoints()[self.next_index()]
    }

    /// Moves to the next endpoint and returns it.
    pub fn switch_to_next(&mut self) -> &Endpoint {
        match self {
            Self::RoundRobin(rr) => rr.current = rr.next_index(),
            Self::PreferredHost(ph) => {
                let next = ph.next_index();
                ph.move_to(next);
            }
        }
        self.current()
    }

    /// Whether the channel should leave its current endpoint ahead of any
    /// failure, i.e. it is sitting on an alternate while a preferred endpoint
    /// is configured.
    pub fn should_switch_prematurely(&self) -> bool {
        match self {
            Self::RoundRobin(_) => false,
            Self::PreferredHost(ph) => ph.current != ph.preferred,
        }
    }

    /// Index of `current()` in the endpoint list.
    pub fn current_index(&self) -> usize {
        match self {
            Self::RoundRobin(rr) => rr.current,
            Self::PreferredHost(ph) => ph.current,
        }
    }

    /// Index of `next()` in the endpoint list.
    pub fn next_index(&self) -> usize {
        match self {
            Self::RoundRobin(rr) => rr.next_index(),
            Self::PreferredHost(ph) => ph.next_index(),
        }
    }

    /// Index of the preferred endpoint, when the policy has one.
    pub fn preferred_index(&self) -> Option<usize> {
        match self {
            Self::RoundRobin(_) => None,
            Self::PreferredHost(ph) => Some(ph.preferred),
        }
    }

    /// Re-seats the selector on `index`. Used when a freshly built selector
    /// replaces the old one on a running channel that is connected elsewhere.
    /// Out-of-range indices are ignored.
    pub fn resume_at(&mut self, index: usize) {
        if index >= self.endpoints().len() {
            return;
        }
        match self {
            Self::RoundRobin(rr) => rr.current = index,
            Self::PreferredHost(ph) => ph.move_to(index),
        }
    }

    /// The endpoint list the selector walks.
    pub fn endpoints(&self) -> &EndpointList {
        match self {
            Self::RoundRobin(rr) => &rr.endpoints,
            Self::PreferredHost(ph) => &ph.endpoints,
        }
    }
}
