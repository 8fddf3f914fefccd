//! Sixaxis probing: hid-sony reads feature reports 0xf2 and 0xf5 before it
//! switches the controller into operational mode, and gives up on the
//! device if either request fails.

pub const SONY_VENDOR_ID: u16 = 0x054c;
pub const SIXAXIS_PRODUCT_ID: u16 = 0x0268;

/// Controller Bluetooth address and serial
const REPORT_F2: [u8; 17] = [
    0xf2, 0xff, 0xff, 0x00, 0x34, 0x12, 0x00, 0x56, 0x50, 0x81, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

/// Paired host address
const REPORT_F5: [u8; 8] = [0x01, 0x00, 0x18, 0x5e, 0x0f, 0x71, 0xa4, 0xbb];

pub(super) fn feature_report(rnum: u8) -> Option<Vec<u8>> {
    match rnum {
        0xf2 => Some(REPORT_F2.to_vec()),
        0xf5 => Some(REPORT_F5.to_vec()),
        _ => None,
    }
}
