//! Address range matching
//!
//! Pure membership test of a candidate address against the operator's
//! target ranges. Parsing failures are never errors here: a provider that
//! hands back garbage simply produces a non-match.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A CIDR-style network prefix the hunt is looking for
///
/// The prefix is stored truncated to its network address, so
/// `203.0.113.9/24` and `203.0.113.0/24` are the same range and both render
/// as `203.0.113.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressRange(IpNet);

impl AddressRange {
    /// Wrap an already parsed network
    pub fn new(net: IpNet) -> Self {
        Self(net.trunc())
    }

    /// The underlying network
    pub fn net(&self) -> IpNet {
        self.0
    }

    /// Check whether `ip` lies inside this range
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }
}

impl FromStr for AddressRange {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(net) = trimmed.parse::<IpNet>() {
            return Ok(Self::new(net));
        }
        // A bare address is a single-host range
        let invalid = || crate::Error::config(format!("Invalid address range: '{}'", s));
        let ip = trimmed.parse::<IpAddr>().map_err(|_| invalid())?;
        let host_len = if ip.is_ipv4() { 32 } else { 128 };
        IpNet::new(ip, host_len).map(Self::new).map_err(|_| invalid())
    }
}

impl TryFrom<String> for AddressRange {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressRange> for String {
    fn from(range: AddressRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Return the first range (in configuration order) containing `address`
///
/// Returns `None` when the address does not parse or lies in no range.
pub fn matching_range<'a>(address: &str, ranges: &'a [AddressRange]) -> Option<&'a AddressRange> {
    let ip = address.trim().parse::<IpAddr>().ok()?;
    ranges.iter().find(|range| range.contains(&ip))
}

/// Check whether `address` lies inside any of `ranges`
pub fn matches(address: &str, ranges: &[AddressRange]) -> bool {
    matching_range(address, ranges).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranges(specs: &[&str]) -> Vec<AddressRange> {
        specs.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn matches_inside_and_outside() {
        let targets = ranges(&["203.0.113.0/24", "198.51.100.128/25"]);

        assert!(matches("203.0.113.55", &targets));
        assert!(matches("198.51.100.200", &targets));
        assert!(!matches("198.51.100.7", &targets));
        assert!(!matches("192.0.2.1", &targets));
    }

    #[test]
    fn malformed_addresses_never_match() {
        let targets = ranges(&["0.0.0.0/0"]);

        assert!(!matches("", &targets));
        assert!(!matches("not-an-ip", &targets));
        assert!(!matches("300.1.1.1", &targets));
        assert!(!matches("10.0.0.1/8", &targets));
    }

    #[test]
    fn address_families_do_not_cross() {
        let targets = ranges(&["2001:db8::/32"]);

        assert!(matches("2001:db8::1", &targets));
        assert!(!matches("203.0.113.1", &targets));
    }

    #[test]
    fn empty_range_set_matches_nothing() {
        assert!(!matches("203.0.113.1", &[]));
    }

    #[test]
    fn canonical_form_is_truncated() {
        let range: AddressRange = "203.0.113.77/24".parse().unwrap();
        assert_eq!(range.to_string(), "203.0.113.0/24");

        let host: AddressRange = "192.0.2.4".parse().unwrap();
        assert_eq!(host.to_string(), "192.0.2.4/32");
    }

    #[test]
    fn matching_range_reports_first_in_order() {
        let targets = ranges(&["10.0.0.0/8", "10.1.0.0/16"]);
        let hit = matching_range("10.1.2.3", &targets).unwrap();
        assert_eq!(hit.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn invalid_range_is_rejected() {
        assert!("203.0.113.0/33".parse::<AddressRange>().is_err());
        assert!("subnet".parse::<AddressRange>().is_err());
    }

    #[test]
    fn serde_uses_canonical_string() {
        let range: AddressRange = serde_json::from_str("\"203.0.113.9/24\"").unwrap();
        assert_eq!(serde_json::to_string(&range).unwrap(), "\"203.0.113.0/24\"");
        assert!(serde_json::from_str::<AddressRange>("\"bogus\"").is_err());
    }

    proptest! {
        #[test]
        fn membership_agrees_with_prefix_mask(addr in any::<u32>(), base in any::<u32>(), len in 0u8..=32) {
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            let net = IpNet::new(IpAddr::from(base.to_be_bytes()), len).unwrap();
            let targets = vec![AddressRange::new(net)];
            let candidate = std::net::Ipv4Addr::from(addr).to_string();

            prop_assert_eq!(matches(&candidate, &targets), (addr & mask) == (base & mask));
        }

        #[test]
        fn arbitrary_strings_never_panic(s in ".*") {
            let targets = ranges(&["0.0.0.0/0", "::/0"]);
            let _ = matches(&s, &targets);
        }
    }
}
