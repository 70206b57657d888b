// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Domain Models
//!
//! Account addresses, token kinds, and the fixed-point amount helpers used
//! by the fungible-token endpoints. All API-visible types derive
//! `Serialize`/`Deserialize`/`ToSchema` for JSON handling and OpenAPI
//! documentation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Fungible token amounts are fixed-point with 8 fractional digits.
pub const AMOUNT_DECIMALS: u8 = 8;

// =============================================================================
// Address
// =============================================================================

/// Chain account address wrapper.
///
/// Format: `0x` followed by 16 hexadecimal characters (8 bytes). Parsing
/// normalises to lowercase so addresses compare and hash consistently.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid address {0:?}: expected 0x + 16 hex characters")]
pub struct AddressError(pub String);

impl Address {
    /// Address string, always `0x`-prefixed lowercase hex.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digits without the `0x` prefix.
    pub fn hex(&self) -> &str {
        &self.0[2..]
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
        if hex_part.len() != 16 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError(raw.to_string()));
        }
        Ok(Address(format!("0x{}", hex_part.to_lowercase())))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Token kind
// =============================================================================

/// Whether a token is fungible or non-fungible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[serde(rename = "ft")]
    Fungible,
    #[serde(rename = "nft")]
    NonFungible,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Fungible => write!(f, "ft"),
            TokenKind::NonFungible => write!(f, "nft"),
        }
    }
}

// =============================================================================
// Fixed-point amounts
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AmountError {
    #[error("invalid amount format: {0}")]
    Format(String),

    #[error("too many decimal places (max {AMOUNT_DECIMALS})")]
    Precision,

    #[error("amount overflow")]
    Overflow,
}

/// Parse a human-readable decimal amount (e.g. `"1.5"`) into the smallest
/// unit (`10^-8`).
pub fn parse_amount(amount: &str) -> Result<u64, AmountError> {
    let parts: Vec<&str> = amount.split('.').collect();

    if parts.len() > 2 || parts[0].is_empty() {
        return Err(AmountError::Format(amount.to_string()));
    }

    let whole = parts[0]
        .parse::<u64>()
        .map_err(|_| AmountError::Format(amount.to_string()))?;

    let fraction = if parts.len() == 2 {
        let dec_str = parts[1];
        if dec_str.is_empty() || !dec_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountError::Format(amount.to_string()));
        }
        if dec_str.len() > AMOUNT_DECIMALS as usize {
            return Err(AmountError::Precision);
        }
        // Pad with zeros to the full precision
        let padded = format!("{:0<width$}", dec_str, width = AMOUNT_DECIMALS as usize);
        padded
            .parse::<u64>()
            .map_err(|_| AmountError::Format(amount.to_string()))?
    } else {
        0
    };

    let multiplier = 10u64.pow(AMOUNT_DECIMALS as u32);
    whole
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(fraction))
        .ok_or(AmountError::Overflow)
}

/// Format a smallest-unit amount back to its human-readable decimal form.
pub fn format_amount(amount: u64) -> String {
    let divisor = 10u64.pow(AMOUNT_DECIMALS as u32);
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder == 0 {
        format!("{whole}.0")
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = AMOUNT_DECIMALS as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        format!("{whole}.{trimmed}")
    }
}
