//! Phone number normalization and the send allow-list

use std::collections::HashSet;

/// Domain of personal chat addresses
pub const DEFAULT_ADDRESS_DOMAIN: &str = "s.whatsapp.net";

/// Strip everything but ASCII digits: `"+1 (555) 000-1111"` becomes `"15550001111"`.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Destination address for `phone` under `domain`.
pub fn to_address(phone: &str, domain: &str) -> String {
    format!("{}@{}", normalize_phone(phone), domain)
}

/// Normalized phone numbers that may receive messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    numbers: HashSet<String>,
}

impl AllowList {
    /// Build from raw entries. Entries with no digits are dropped.
    pub fn new<I, S>(phones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let numbers = phones
            .into_iter()
            .map(|phone| normalize_phone(phone.as_ref()))
            .filter(|digits| !digits.is_empty())
            .collect();
        Self { numbers }
    }

    /// Whether `phone` normalizes to an allowed number.
    pub fn contains(&self, phone: &str) -> bool {
        self.numbers.contains(&normalize_phone(phone))
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}
