//! Device-specific behaviors keyed by vendor and product.
//!
//! Most recordings replay fine through a plain passthrough device. Some
//! kernel drivers however talk to the hardware while probing and refuse to
//! bind until they get sensible answers; those devices get a profile.

use crate::protocol::{Identity, UHID_FEATURE_REPORT};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, trace};

mod sony;

/// Known device profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileId {
    /// Sony Sixaxis / DualShock 3 over USB
    Ps3Controller,
}
impl ProfileId {
    pub fn name(&self) -> &'static str {
        match self {
            ProfileId::Ps3Controller => "Sony PLAYSTATION(R)3 Controller",
        }
    }
}

/// How a virtual device answers the kernel and shapes injected reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Known(ProfileId),
    GenericPassthrough,
}

/// Answer to a GET_REPORT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportReply {
    pub err: u16,
    pub data: Vec<u8>,
}
impl ReportReply {
    pub fn ok(data: Vec<u8>) -> Self {
        Self { err: 0, data }
    }

    pub fn error() -> Self {
        Self {
            err: libc::EIO as u16,
            data: Vec::new(),
        }
    }
}

impl Behavior {
    /// Report bytes as they should reach the kernel. hidraw captures
    /// already carry the report ID, so no known profile rewrites them yet.
    pub fn translate_input<'a>(&self, payload: &'a [u8]) -> Cow<'a, [u8]> {
        match self {
            Behavior::Known(ProfileId::Ps3Controller) | Behavior::GenericPassthrough => {
                Cow::Borrowed(payload)
            }
        }
    }

    pub fn get_report(&self, rnum: u8, rtype: u8) -> ReportReply {
        let reply = match self {
            Behavior::Known(ProfileId::Ps3Controller) if rtype == UHID_FEATURE_REPORT => {
                sony::feature_report(rnum)
            }
            _ => None,
        };
        debug!(
            "get_report rnum=0x{:02x} rtype={} answered={}",
            rnum,
            rtype,
            reply.is_some()
        );
        reply.map(ReportReply::ok).unwrap_or_else(ReportReply::error)
    }

    /// Returns the errno sent back with the SET_REPORT reply
    pub fn set_report(&self, rnum: u8, rtype: u8, data: &[u8]) -> u16 {
        debug!(
            "set_report rnum=0x{:02x} rtype={} data={:02x?}",
            rnum, rtype, data
        );
        match self {
            Behavior::Known(ProfileId::Ps3Controller) => 0,
            Behavior::GenericPassthrough => libc::EIO as u16,
        }
    }

    /// Output reports (LEDs, rumble) are only logged
    pub fn output_report(&self, data: &[u8], rtype: u8) {
        trace!("output rtype={} data={:02x?}", rtype, data);
    }
}

/// Immutable map from (vendor, product) to a profile, built once at
/// startup and handed to whoever needs to resolve devices.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<(u16, u16), ProfileId>,
}
impl ProfileRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Profiles shipped with the crate
    pub fn builtin() -> Self {
        Self::empty().with(
            sony::SONY_VENDOR_ID,
            sony::SIXAXIS_PRODUCT_ID,
            ProfileId::Ps3Controller,
        )
    }

    /// Register a profile for an exact vendor and product
    pub fn with(mut self, vendor_id: u16, product_id: u16, profile: ProfileId) -> Self {
        self.profiles.insert((vendor_id, product_id), profile);
        self
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Exact-match lookup; unknown identities get the passthrough behavior
    pub fn resolve(&self, identity: &Identity) -> Behavior {
        self.profiles
            .get(&(identity.vendor_id, identity.product_id))
            .copied()
            .map(Behavior::Known)
            .unwrap_or(Behavior::GenericPassthrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BUS_BLUETOOTH, BUS_USB, UHID_OUTPUT_REPORT};

    #[test]
    fn sixaxis_resolves_on_any_bus() {
        let registry = ProfileRegistry::builtin();
        for bus in [BUS_USB, BUS_BLUETOOTH] {
            assert_eq!(
                registry.resolve(&Identity::new(bus, 0x054c, 0x0268)),
                Behavior::Known(ProfileId::Ps3Controller)
            );
        }
    }

    #[test]
    fn lookup_is_exact() {
        let registry = ProfileRegistry::builtin();
        assert_eq!(
            registry.resolve(&Identity::new(BUS_USB, 0x054c, 0x0269)),
            Behavior::GenericPassthrough
        );
        assert_eq!(
            registry.resolve(&Identity::new(BUS_USB, 0x054d, 0x0268)),
            Behavior::GenericPassthrough
        );
    }

    #[test]
    fn injected_registry_replaces_builtin() {
        let registry = ProfileRegistry::empty().with(0x1234, 0x5678, ProfileId::Ps3Controller);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.resolve(&Identity::new(BUS_USB, 0x054c, 0x0268)),
            Behavior::GenericPassthrough
        );
        assert_eq!(
            registry.resolve(&Identity::new(BUS_USB, 0x1234, 0x5678)),
            Behavior::Known(ProfileId::Ps3Controller)
        );
    }

    #[test]
    fn passthrough_leaves_payload_alone() {
        let payload = [0x01, 0x02, 0x03];
        let out = Behavior::GenericPassthrough.translate_input(&payload);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &payload);
    }

    #[test]
    fn passthrough_rejects_report_requests() {
        let reply = Behavior::GenericPassthrough.get_report(0x01, UHID_FEATURE_REPORT);
        assert_ne!(reply.err, 0);
        assert!(reply.data.is_empty());
        assert_ne!(
            Behavior::GenericPassthrough.set_report(0x01, UHID_OUTPUT_REPORT, &[0]),
            0
        );
    }

    #[test]
    fn sixaxis_answers_handshake_feature_reports() {
        let ps3 = Behavior::Known(ProfileId::Ps3Controller);

        let f2 = ps3.get_report(0xf2, UHID_FEATURE_REPORT);
        assert_eq!(f2.err, 0);
        assert_eq!(f2.data[0], 0xf2);

        let f5 = ps3.get_report(0xf5, UHID_FEATURE_REPORT);
        assert_eq!(f5.err, 0);
        assert!(!f5.data.is_empty());

        assert_ne!(ps3.get_report(0x42, UHID_FEATURE_REPORT).err, 0);
        assert_eq!(ps3.set_report(0xf4, UHID_FEATURE_REPORT, &[0x42, 0x02]), 0);
    }
}
