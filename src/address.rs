/// BLE device addresses, Identity Resolving Keys, and RPA resolution.
///
/// Implements the random address hash function `ah()` from the Bluetooth
/// Core Specification (Vol 3, Part H, Section 2.2.2) and the checks around
/// it. Byte order follows the address as it is displayed: the first three
/// octets (`AA:BB:CC`) are `prand`, the last three (`DD:EE:FF`) are `hash`.
///
/// IRKs cannot be sniffed over the air. They are exchanged during pairing
/// over an encrypted link, so a key has to be pulled from a bonded host
/// (see [`crate::defaults::KEY_HELP`]).
use core::fmt;
use core::str::FromStr;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::{Error, Result};
use crate::protocol::MacString;

/// Length of an Identity Resolving Key in bytes
pub const KEY_LEN: usize = 16;

/// A 6-byte BLE device address, stored in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// True if this is a Resolvable Private Address.
    pub fn is_private_resolvable(&self) -> bool {
        is_private_resolvable(&self.0)
    }

    /// Build the resolvable private address that `key` generates for `prand`.
    ///
    /// The top two bits of `prand[0]` are forced to `01`.
    pub fn from_prand(key: &IdentityKey, prand: [u8; 3]) -> Self {
        let prand = [(prand[0] & 0x3F) | 0x40, prand[1], prand[2]];
        let hash = ah(key, &prand);
        Self([prand[0], prand[1], prand[2], hash[0], hash[1], hash[2]])
    }

    /// Render into a fixed-capacity string for the NDJSON protocol.
    pub fn to_mac_string(&self) -> MacString {
        use core::fmt::Write;
        let mut buf = MacString::new();
        let _ = write!(buf, "{self}");
        buf
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !is_valid_address_format(s) {
            return Err(Error::InvalidAddressFormat(s.to_owned()));
        }
        let mut bytes = [0u8; 6];
        for (slot, octet) in bytes.iter_mut().zip(s.split(':')) {
            *slot = u8::from_str_radix(octet, 16)
                .map_err(|_| Error::InvalidAddressFormat(s.to_owned()))?;
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// A 16-byte Identity Resolving Key.
///
/// `Debug` does not print the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityKey([u8; KEY_LEN]);

impl IdentityKey {
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityKey(..)")
    }
}

impl FromStr for IdentityKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_key(s)
    }
}

/// Parse an IRK from hex text.
///
/// Accepts plain hex, an optional `0x` prefix, and `:`, `-` or space
/// separators. Case-insensitive.
pub fn parse_key(text: &str) -> Result<IdentityKey> {
    let mut s = text.trim();
    if s.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("0x")) {
        s = &s[2..];
    }
    let digits: String = s.chars().filter(|c| !matches!(c, ':' | '-' | ' ')).collect();

    let count = digits.chars().count();
    if count != KEY_LEN * 2 {
        return Err(Error::InvalidKeyFormat(count));
    }

    let mut key = [0u8; KEY_LEN];
    hex::decode_to_slice(&digits, &mut key)
        .map_err(|_| Error::InvalidHexDigit(text.to_owned()))?;
    Ok(IdentityKey(key))
}

/// Validate IRK text without failing. Returns the error message, if any.
pub fn validate_key(text: &str) -> Option<String> {
    parse_key(text).err().map(|e| e.to_string())
}

/// True iff `text` is six colon-separated two-digit hex octets.
pub fn is_valid_address_format(text: &str) -> bool {
    let mut octets = 0;
    for part in text.split(':') {
        octets += 1;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }
    }
    octets == 6
}

/// A Resolvable Private Address has the two most significant bits of the
/// most significant byte set to `01`.
pub fn is_private_resolvable(address: &[u8; 6]) -> bool {
    address[0] >> 6 == 0b01
}

/// Random address hash function `ah(k, r)`.
///
/// `r' = padding(13 zero bytes) || prand`, `ah = e(k, r')` truncated to the
/// least significant 24 bits, i.e. the last three output bytes.
pub fn ah(key: &IdentityKey, prand: &[u8; 3]) -> [u8; 3] {
    let mut block = GenericArray::from([0u8; 16]);
    block[13..].copy_from_slice(prand);

    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    cipher.encrypt_block(&mut block);

    [block[13], block[14], block[15]]
}

/// Check whether `key` generated `address`.
///
/// Always false for addresses that are not resolvable private addresses.
pub fn resolve(key: &IdentityKey, address: &Address) -> bool {
    let bytes = address.bytes();
    if !is_private_resolvable(bytes) {
        return false;
    }

    let prand = [bytes[0], bytes[1], bytes[2]];
    let hash = [bytes[3], bytes[4], bytes[5]];
    ah(key, &prand) == hash
}
