//! Hardware address text handling.
//!
//! Addresses are kept in their textual colon separated form, exactly as `ip`
//! prints them, the workflow never needs the octets themselves.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Marker preceding the hardware address in `ip link show` output.
pub const LINK_ETHER_MARKER: &str = "link/ether ";

/// Length of `XX:XX:XX:XX:XX:XX`.
const MAC_TEXT_LEN: usize = 17;

/// Hardware address in its canonical `XX:XX:XX:XX:XX:XX` text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacAddress(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a MAC address of the form XX:XX:XX:XX:XX:XX")]
/// Text that is not a canonical MAC address.
pub struct MacParseError(pub String);

impl MacAddress {
    /// The address text, case preserved.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parse a canonical address, hex digits in any case:
/// ```
/// use lib::mac::MacAddress;
/// let mac: MacAddress = "00:11:22:aa:BB:cc".parse().unwrap();
/// assert_eq!(mac.as_str(), "00:11:22:aa:BB:cc");
/// assert!("00-11-22-aa-bb-cc".parse::<MacAddress>().is_err());
/// ```
impl FromStr for MacAddress {
    type Err = MacParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_canonical(s) {
            Ok(MacAddress(s.to_owned()))
        } else {
            Err(MacParseError(s.to_owned()))
        }
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MacAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// `true` when `s` is six colon separated pairs of hex digits.
pub fn is_canonical(s: &str) -> bool {
    s.len() == MAC_TEXT_LEN
        && s.split(':').count() == 6
        && s
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Find the address following the first `link/ether ` marker that is
/// followed by 17 hex digits or colons.
///
/// The token is only checked against that character set, not against the
/// octet layout, mirroring how loosely `ip` output is matched.
pub fn find_link_ether(text: &str) -> Option<MacAddress> {
    text.match_indices(LINK_ETHER_MARKER).find_map(|(idx, _)| {
        let start = idx + LINK_ETHER_MARKER.len();
        let candidate = text.get(start..start + MAC_TEXT_LEN)?;
        candidate
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':')
            .then(|| MacAddress(candidate.to_owned()))
    })
}
