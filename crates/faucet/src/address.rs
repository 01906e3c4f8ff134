//! Destination address validation

use crate::error::{FaucetError, FaucetResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a standard Monero address
pub const STANDARD_ADDRESS_LEN: usize = 95;

/// Length of an integrated address (standard address plus a short payment id)
pub const INTEGRATED_ADDRESS_LEN: usize = 106;

/// Address shape, determined by length only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Standard,
    Integrated,
}

/// A syntactically valid payout destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DestinationAddress {
    value: String,
    kind: AddressKind,
}

impl DestinationAddress {
    /// Validate a raw address. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> FaucetResult<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(FaucetError::InvalidAddress(
                "address may not be blank".to_string(),
            ));
        }

        let kind = match value.chars().count() {
            STANDARD_ADDRESS_LEN => AddressKind::Standard,
            INTEGRATED_ADDRESS_LEN => AddressKind::Integrated,
            len => {
                return Err(FaucetError::InvalidAddress(format!(
                    "address too short/long ({} characters)",
                    len
                )))
            }
        };

        Ok(Self {
            value: value.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// Standard addresses need a payment id attached to the transfer
    pub fn needs_payment_id(&self) -> bool {
        self.kind == AddressKind::Standard
    }
}

impl fmt::Display for DestinationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl TryFrom<String> for DestinationAddress {
    type Error = FaucetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DestinationAddress> for String {
    fn from(address: DestinationAddress) -> Self {
        address.value
    }
}
