//! Token registry
//!
//! Per-chain token metadata: symbol, decimals and a USD reference price.
//! Used for decimal normalization, USD conversion and log formatting.
//! Reference prices start from config and are refreshed each tick from
//! quotes against the chain's USD anchor token.

use alloy_primitives::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::cartographer::Quote;
use crate::config::ChainConfig;
use crate::fixed::{denormalize_amount, normalize_amount, Usd};

/// A token we're tracking
#[derive(Debug, Clone)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    pub is_base: bool,
}

pub struct TokenRegistry {
    tokens: HashMap<Address, Token>,
    prices: RwLock<HashMap<Address, Usd>>,
    wrapped_native: Address,
    usd_anchor: Option<Address>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<(Token, Usd)>, wrapped_native: Address, usd_anchor: Option<Address>) -> Self {
        let mut by_address = HashMap::new();
        let mut prices = HashMap::new();
        for (token, price) in tokens {
            prices.insert(token.address, price);
            by_address.insert(token.address, token);
        }
        Self {
            tokens: by_address,
            prices: RwLock::new(prices),
            wrapped_native,
            usd_anchor,
        }
    }

    pub fn from_config(chain: &ChainConfig) -> Self {
        let tokens = chain
            .tokens
            .iter()
            .map(|t| {
                (
                    Token {
                        symbol: t.symbol.clone(),
                        address: t.address,
                        decimals: t.decimals,
                        is_base: chain.base_tokens.contains(&t.address),
                    },
                    Usd::from_dollars(t.usd_price),
                )
            })
            .collect();
        Self::new(tokens, chain.wrapped_native, chain.usd_anchor)
    }

    pub fn get(&self, address: &Address) -> Option<&Token> {
        self.tokens.get(address)
    }

    pub fn decimals(&self, address: &Address) -> Option<u8> {
        self.tokens.get(address).map(|t| t.decimals)
    }

    /// Symbol for logs; unknown tokens print as a shortened address
    pub fn symbol(&self, address: &Address) -> String {
        match self.tokens.get(address) {
            Some(token) => token.symbol.clone(),
            None => {
                let hex = format!("{:?}", address);
                format!("{}…{}", &hex[..6], &hex[hex.len() - 4..])
            }
        }
    }

    pub fn base_tokens(&self) -> Vec<Address> {
        let mut base: Vec<Address> = self.tokens.values().filter(|t| t.is_base).map(|t| t.address).collect();
        base.sort();
        base
    }

    pub fn is_base(&self, address: &Address) -> bool {
        self.tokens.get(address).map(|t| t.is_base).unwrap_or(false)
    }

    pub fn usd_price(&self, address: &Address) -> Option<Usd> {
        self.prices.read().get(address).copied()
    }

    /// USD price of the chain's native token, used for gas costing
    pub fn native_usd(&self) -> Usd {
        self.usd_price(&self.wrapped_native).unwrap_or(Usd::ZERO)
    }

    /// USD value of a raw on-chain amount
    pub fn usd_value(&self, token: &Address, raw: u128) -> Option<Usd> {
        let decimals = self.decimals(token)?;
        let price = self.usd_price(token)?;
        let whole = normalize_amount(raw, decimals)?;
        Some(price.mul_ratio(whole))
    }

    /// Raw on-chain amount worth `usd` of `token`
    pub fn raw_for_usd(&self, token: &Address, usd: Usd) -> Option<u128> {
        let decimals = self.decimals(token)?;
        let price = self.usd_price(token)?;
        let whole = usd.ratio_to(price)?;
        denormalize_amount(whole, decimals)
    }

    /// Refresh USD references from direct quotes into the anchor token.
    /// The fee is backed out so the reference is the mid price.
    pub fn refresh_from_quotes(&self, quotes: &[Arc<Quote>]) -> usize {
        let Some(anchor) = self.usd_anchor else {
            return 0;
        };
        let Some(anchor_price) = self.usd_price(&anchor) else {
            return 0;
        };

        let mut best: HashMap<Address, &Quote> = HashMap::new();
        for quote in quotes.iter().filter(|q| q.token_out == anchor && q.token_in != anchor) {
            let deeper = best
                .get(&quote.token_in)
                .map(|current| quote.liquidity_usd > current.liquidity_usd)
                .unwrap_or(true);
            if deeper {
                best.insert(quote.token_in, quote);
            }
        }

        let mut prices = self.prices.write();
        for (token, quote) in &best {
            let Some(mid) = quote.mid_ratio() else {
                continue;
            };
            let price = anchor_price.mul_ratio(mid);
            trace!("Reference price {:?} = {}", token, price);
            prices.insert(*token, price);
        }
        best.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{Bps, Ratio};
    use alloy_primitives::address;

    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

    fn registry() -> TokenRegistry {
        TokenRegistry::new(
            vec![
                (Token { symbol: "WETH".into(), address: WETH, decimals: 18, is_base: true }, Usd::from_whole(2_000)),
                (Token { symbol: "USDC".into(), address: USDC, decimals: 6, is_base: true }, Usd::from_whole(1)),
            ],
            WETH,
            Some(USDC),
        )
    }

    #[test]
    fn test_usd_conversions() {
        let tokens = registry();
        // 1.5 WETH
        assert_eq!(tokens.usd_value(&WETH, 1_500_000_000_000_000_000), Some(Usd::from_whole(3_000)));
        assert_eq!(tokens.raw_for_usd(&USDC, Usd::from_whole(500)), Some(500_000_000));
        assert_eq!(tokens.native_usd(), Usd::from_whole(2_000));
    }

    #[test]
    fn test_unknown_symbol_is_shortened() {
        let tokens = registry();
        assert_eq!(tokens.symbol(&WETH), "WETH");
        let unknown = tokens.symbol(&Address::repeat_byte(0xab));
        assert!(unknown.starts_with("0xabab"));
        assert!(tokens.usd_value(&Address::ZERO, 1).is_none());
    }

    #[test]
    fn test_refresh_from_anchor_quotes() {
        let tokens = registry();
        let quote = Arc::new(Quote::new_for_test(
            "uni",
            WETH,
            USDC,
            // 2500 USDC per WETH after a 0% fee
            Ratio::from_fraction(2_500, 1).unwrap(),
            Bps::ZERO,
            Usd::from_whole(1_000_000),
        ));
        assert_eq!(tokens.refresh_from_quotes(&[quote]), 1);
        assert_eq!(tokens.usd_price(&WETH), Some(Usd::from_whole(2_500)));
    }
}
