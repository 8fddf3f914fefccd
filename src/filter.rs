use crate::error::Error;
use crate::protocol::Identity;
use std::str::FromStr;

/// `[[bus]:]vendor:product` as given on the command line. The bus is
/// decimal, vendor and product are hexadecimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityFilter {
    pub bus: Option<u16>,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl IdentityFilter {
    /// Every field present in the filter must match exactly
    pub fn matches(&self, identity: &Identity) -> bool {
        self.bus.is_none_or(|bus| bus == identity.bus)
            && self.vendor_id == identity.vendor_id
            && self.product_id == identity.product_id
    }
}

impl FromStr for IdentityFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        let parsed = match fields.as_slice() {
            [bus, vendor, product] if !bus.is_empty() => bus
                .parse()
                .ok()
                .zip(hex(vendor).zip(hex(product)))
                .map(|(bus, (vendor_id, product_id))| Self {
                    bus: Some(bus),
                    vendor_id,
                    product_id,
                }),
            ["", vendor, product] | [vendor, product] => {
                hex(vendor)
                    .zip(hex(product))
                    .map(|(vendor_id, product_id)| Self {
                        bus: None,
                        vendor_id,
                        product_id,
                    })
            }
            _ => None,
        };
        parsed.ok_or_else(|| Error::InvalidFilter(s.to_string()))
    }
}

fn hex(field: &str) -> Option<u16> {
    let digits = field.strip_prefix("0x").unwrap_or(field);
    u16::from_str_radix(digits, 16).ok()
}
