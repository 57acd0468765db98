//! Token and amount model shared by every component.
//!
//! All accounting, persistence, and adapter boundaries use integer base
//! units (satoshis for BTC, the token's smallest unit otherwise). Decimal
//! strings exist only at the CEX boundary (`utils::decimal`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount in a token's smallest indivisible unit.
pub type Amount = u128;

/// The closed set of assets the hedger moves.
///
/// `Btc` and `BtcLn` denote the same underlying asset over different rails;
/// they share a CEX currency code but differ in how legs are sent and
/// confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "BTC-LN")]
    BtcLn,
    #[serde(rename = "USDC")]
    Usdc,
    #[serde(rename = "USDT")]
    Usdt,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "SOL")]
    Sol,
}

impl Token {
    /// Number of decimal places of the base unit.
    pub fn decimals(&self) -> u32 {
        match self {
            Token::Btc | Token::BtcLn => 8,
            Token::Usdc | Token::Usdt => 6,
            Token::Eth => 18,
            Token::Sol => 9,
        }
    }

    /// Currency code as the CEX names it. Lightning deposits and
    /// withdrawals are just BTC on a different chain selector.
    pub fn cex_ccy(&self) -> &'static str {
        match self {
            Token::Btc | Token::BtcLn => "BTC",
            Token::Usdc => "USDC",
            Token::Usdt => "USDT",
            Token::Eth => "ETH",
            Token::Sol => "SOL",
        }
    }

    /// True for both rails of the bitcoin side.
    pub fn is_bitcoin(&self) -> bool {
        matches!(self, Token::Btc | Token::BtcLn)
    }

    /// True for tokens custodied in the smart-chain escrow contract.
    pub fn is_smart_chain(&self) -> bool {
        !self.is_bitcoin()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Btc => "BTC",
            Token::BtcLn => "BTC-LN",
            Token::Usdc => "USDC",
            Token::Usdt => "USDT",
            Token::Eth => "ETH",
            Token::Sol => "SOL",
        };
        write!(f, "{}", s)
    }
}

/// Serde helper for `Amount` fields persisted in the state document.
///
/// Canonical encoding is a decimal string. Documents written by older
/// deployments carried `0x`-prefixed hex; the deserializer accepts both so
/// a restart never reinterprets an amount.
pub mod amount_str {
    use super::Amount;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(de)?;
        parse(&s).map_err(de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Amount, String> {
        if let Some(hex_digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Amount::from_str_radix(hex_digits, 16)
                .map_err(|e| format!("invalid hex amount {:?}: {}", s, e))
        } else {
            s.parse::<Amount>()
                .map_err(|e| format!("invalid amount {:?}: {}", s, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimals_table() {
        assert_eq!(Token::Btc.decimals(), 8);
        assert_eq!(Token::BtcLn.decimals(), 8);
        assert_eq!(Token::Usdc.decimals(), 6);
        assert_eq!(Token::Usdt.decimals(), 6);
        assert_eq!(Token::Eth.decimals(), 18);
        assert_eq!(Token::Sol.decimals(), 9);
    }

    #[test]
    fn test_both_btc_rails_share_cex_ccy() {
        assert_eq!(Token::Btc.cex_ccy(), "BTC");
        assert_eq!(Token::BtcLn.cex_ccy(), "BTC");
        assert!(Token::BtcLn.is_bitcoin());
        assert!(!Token::Sol.is_bitcoin());
    }

    #[test]
    fn test_serde_symbols() {
        assert_eq!(serde_json::to_string(&Token::BtcLn).unwrap(), "\"BTC-LN\"");
        let t: Token = serde_json::from_str("\"USDC\"").unwrap();
        assert_eq!(t, Token::Usdc);
    }

    #[test]
    fn test_amount_parse_decimal_and_hex() {
        assert_eq!(amount_str::parse("100000000").unwrap(), 100_000_000);
        assert_eq!(amount_str::parse("0x5f5e100").unwrap(), 100_000_000);
        assert!(amount_str::parse("12.5").is_err());
    }
}
