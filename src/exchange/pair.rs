//! Mapping a (src, dst) rebalance direction onto a spot instrument.
//!
//! The venue lists BTC as the base asset against stablecoins and as the
//! quote asset against ETH and SOL. The side follows from which end of the
//! instrument the source token sits on: selling the base when moving off
//! it, buying the base when moving onto it.

use crate::error::EngineError;
use crate::token::Token;

/// A resolved spot instrument and the side that converts src into dst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingPair {
    pub base: Token,
    pub quote: Token,
    /// True when the order buys the base asset; the order size is then
    /// denominated in the quote currency.
    pub buy: bool,
}

impl TradingPair {
    /// Venue instrument string, e.g. `BTC-USDC` or `ETH-BTC`.
    pub fn instrument(&self) -> String {
        format!("{}-{}", self.base.cex_ccy(), self.quote.cex_ccy())
    }
}

/// Resolve the instrument and side converting `src` into `dst`.
///
/// Exactly one side must be a bitcoin rail; both rails map to the same
/// spot markets.
pub fn resolve(src: Token, dst: Token) -> Result<TradingPair, EngineError> {
    let invalid = || EngineError::InvalidPair { src, dst };

    if src.is_bitcoin() == dst.is_bitcoin() {
        return Err(invalid());
    }
    let other = if src.is_bitcoin() { dst } else { src };

    let (base, quote) = match other {
        Token::Usdc | Token::Usdt => (Token::Btc, other),
        Token::Eth | Token::Sol => (other, Token::Btc),
        _ => return Err(invalid()),
    };

    // Buy the base when the source sits on the quote side.
    let src_is_base = if src.is_bitcoin() {
        base == Token::Btc
    } else {
        base == src
    };

    Ok(TradingPair {
        base,
        quote,
        buy: !src_is_base,
    })
}
