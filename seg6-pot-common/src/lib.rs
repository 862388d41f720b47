#![cfg_attr(not(test), no_std)]

// Layout shared with the data-plane object. The C side declares the map as
// `BPF_MAP_TYPE_HASH` keyed by `struct in6_addr` with a `struct pot_sid_key`
// value, pinned by name; these types must match it byte for byte.

pub const SID_LEN: usize = 16;
pub const SECRET_LEN: usize = 32;

/// Name of the pinned key map inside the object (and under the pin directory).
pub const KEY_MAP_NAME: &str = "seg6_pot_keys";
/// `SEG6_MAX_KEYS` in the data plane, bounded by the SRH segment limit.
pub const KEY_MAP_CAPACITY: u32 = 8;

pub const INGRESS_PROGRAM: &str = "seg6_pot_tlv_d";
pub const EGRESS_PROGRAM: &str = "seg6_pot_tlv";

/// Binary SID, i.e. the 16 octets of an IPv6 address in network order.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SidKey(pub [u8; SID_LEN]);

/// Per-SID secret consumed by the PoT computation.
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SecretValue(pub [u8; SECRET_LEN]);

impl SidKey {
    pub const fn as_bytes(&self) -> &[u8; SID_LEN] {
        &self.0
    }
}

impl SecretValue {
    pub const fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl Default for SecretValue {
    fn default() -> Self {
        Self([0; SECRET_LEN])
    }
}

// Keep secrets out of debug output.
impl core::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SecretValue(..)")
    }
}

// With the `user` feature the types implement `aya::Pod` so they can be used
// with aya's typed map APIs. The no_std side never needs aya.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::{SecretValue, SidKey};
    use aya::Pod;

    unsafe impl Pod for SidKey {}
    unsafe impl Pod for SecretValue {}
}
