//! Addressing level model.
//!
//! # Responsibility
//! - Classify how directly a message addresses the target recipient.
//! - Own the address matching policy applied to raw `To`/`Cc` header text.
//!
//! # Invariants
//! - `AddressingLevel` is totally ordered: `None < Cc < To`.
//! - `To` wins over `Cc` when the target appears in both headers.

use mail_parser::{Addr, Address, HeaderValue, MessageParser};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Strength of direct addressing of the target recipient.
///
/// Variant order is significant: derived `Ord` gives `None < Cc < To`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingLevel {
    /// Target appears in neither `To` nor `Cc`.
    None,
    /// Target appears in `Cc` only.
    Cc,
    /// Target appears in `To`.
    To,
}

impl AddressingLevel {
    /// One-character marker used by thread views.
    pub fn marker(self) -> char {
        match self {
            Self::None => ' ',
            Self::Cc => 'c',
            Self::To => 't',
        }
    }
}

/// How the target address is compared against raw header text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressMatch {
    /// Raw substring containment, case-sensitive.
    Exact,
    /// Substring containment after ASCII case folding of both sides.
    #[default]
    CaseInsensitive,
    /// Header parsed as an address list; addr-specs compared for equality
    /// after ASCII case folding.
    Normalized,
}

impl AddressMatch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::CaseInsensitive => "case-insensitive",
            Self::Normalized => "normalized",
        }
    }
}

impl Display for AddressMatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressMatch {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "case-insensitive" | "case_insensitive" | "icase" => Ok(Self::CaseInsensitive),
            "normalized" | "normalised" => Ok(Self::Normalized),
            other => Err(format!(
                "unsupported address match mode `{other}`; expected exact|case-insensitive|normalized"
            )),
        }
    }
}

/// Target address prepared for repeated header matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMatcher {
    target: String,
    mode: AddressMatch,
}

impl AddressMatcher {
    pub fn new(target: impl Into<String>, mode: AddressMatch) -> Self {
        let target = target.into();
        let target = match mode {
            AddressMatch::Exact => target,
            AddressMatch::CaseInsensitive => target.to_ascii_lowercase(),
            AddressMatch::Normalized => normalize_target(&target),
        };
        Self { target, mode }
    }

    pub fn mode(&self) -> AddressMatch {
        self.mode
    }

    /// Returns whether the target occurs in one raw header value.
    ///
    /// An empty target never matches.
    pub fn matches(&self, header_value: &str) -> bool {
        if self.target.is_empty() {
            return false;
        }
        match self.mode {
            AddressMatch::Exact => header_value.contains(self.target.as_str()),
            AddressMatch::CaseInsensitive => header_value
                .to_ascii_lowercase()
                .contains(self.target.as_str()),
            AddressMatch::Normalized => addr_specs(header_value)
                .iter()
                .any(|spec| *spec == self.target),
        }
    }

    /// Derives the addressing level from raw `To` and `Cc` header values.
    pub fn addressing_level(&self, to: &str, cc: &str) -> AddressingLevel {
        if self.matches(to) {
            AddressingLevel::To
        } else if self.matches(cc) {
            AddressingLevel::Cc
        } else {
            AddressingLevel::None
        }
    }
}

/// Lowercased addr-specs of every mailbox in an address-list header value.
///
/// Group members are flattened; entries without an addr-spec are dropped.
fn addr_specs(value: &str) -> Vec<String> {
    let raw = format!("To: {}\r\n\r\n", value.replace(['\r', '\n'], " "));
    let Some(message) = MessageParser::new().parse(raw.as_bytes()) else {
        return Vec::new();
    };

    let mut specs = Vec::new();
    for header in message.headers() {
        match header.value() {
            HeaderValue::Address(Address::List(addrs)) => {
                specs.extend(addrs.iter().filter_map(addr_spec));
            }
            HeaderValue::Address(Address::Group(groups)) => {
                for group in groups {
                    specs.extend(group.addresses.iter().filter_map(addr_spec));
                }
            }
            _ => (),
        }
    }
    specs
}

fn addr_spec(addr: &Addr<'_>) -> Option<String> {
    addr.address
        .as_ref()
        .map(|email| email.trim().to_ascii_lowercase())
        .filter(|email| !email.is_empty())
}

fn normalize_target(target: &str) -> String {
    addr_specs(target)
        .into_iter()
        .next()
        .unwrap_or_else(|| target.trim().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::{AddressMatch, AddressMatcher, AddressingLevel};

    #[test]
    fn levels_are_ordered_none_cc_to() {
        assert!(AddressingLevel::None < AddressingLevel::Cc);
        assert!(AddressingLevel::Cc < AddressingLevel::To);
        assert!(AddressingLevel::None < AddressingLevel::To);
    }

    #[test]
    fn to_wins_over_cc() {
        let matcher = AddressMatcher::new("me@example.com", AddressMatch::CaseInsensitive);
        let level = matcher.addressing_level("me@example.com", "me@example.com");
        assert_eq!(level, AddressingLevel::To);
    }

    #[test]
    fn case_insensitive_mode_ignores_case_and_order() {
        let matcher = AddressMatcher::new("Me@Example.com", AddressMatch::CaseInsensitive);
        assert_eq!(
            matcher.addressing_level("a@x.org, ME@EXAMPLE.COM", ""),
            AddressingLevel::To
        );
        assert_eq!(
            matcher.addressing_level("a@x.org", "b@y.org, me@example.com"),
            AddressingLevel::Cc
        );
        assert_eq!(
            matcher.addressing_level("a@x.org", "b@y.org"),
            AddressingLevel::None
        );
    }

    #[test]
    fn exact_mode_keeps_raw_substring_semantics() {
        let matcher = AddressMatcher::new("me@example.com", AddressMatch::Exact);
        assert_eq!(matcher.mode(), AddressMatch::Exact);
        assert!(matcher.matches("Someone <me@example.com>"));
        assert!(!matcher.matches("ME@EXAMPLE.COM"));
        // Raw containment also hits longer addresses.
        assert!(matcher.matches("time@example.com"));
    }

    #[test]
    fn normalized_mode_compares_addr_specs() {
        let matcher = AddressMatcher::new("Me@Example.com", AddressMatch::Normalized);
        assert!(matcher.matches("\"Doe, Jane\" <jane@x.org>, Me <ME@example.com>"));
        assert!(matcher.matches("me@example.com (home)"));
        assert!(!matcher.matches("time@example.com"));
        assert!(!matcher.matches(""));
    }

    #[test]
    fn empty_target_never_matches() {
        let matcher = AddressMatcher::new("", AddressMatch::CaseInsensitive);
        assert_eq!(
            matcher.addressing_level("a@x.org", "b@y.org"),
            AddressingLevel::None
        );
    }

    #[test]
    fn normalized_mode_ignores_addresses_inside_comments() {
        let matcher = AddressMatcher::new("me@example.com", AddressMatch::Normalized);
        assert!(matcher.matches("me@example.com (Me <old@example.org>)"));
    }

    #[test]
    fn normalized_mode_reads_group_members() {
        let matcher = AddressMatcher::new("Me <me@example.com>", AddressMatch::Normalized);
        assert!(matcher.matches("team: a@x.org, me@example.com;"));
        assert!(!matcher.matches("undisclosed-recipients:;"));
    }

    #[test]
    fn address_match_parses_cli_values() {
        assert_eq!("exact".parse::<AddressMatch>(), Ok(AddressMatch::Exact));
        assert_eq!(
            " Normalized ".parse::<AddressMatch>(),
            Ok(AddressMatch::Normalized)
        );
        assert!("fuzzy".parse::<AddressMatch>().is_err());
    }
}
