//! Exchange pair symbol parsing.
//!
//! Exchanges name markets by concatenating base and quote (`BCHBTC`). The
//! quote is recovered by matching a known suffix; when several match, the
//! caller's knowledge of tracked currencies picks the split.

use crate::symbol::Symbol;

/// Quote suffixes grouped by length, longest first.
const QUOTE_SUFFIXES: [(usize, &[&str]); 2] = [
    (4, &["USDT", "TUSD", "USDC"]),
    (3, &["BTC", "ETH", "BNB", "PAX", "XRP", "USD", "EUR", "GBP"]),
];

/// Split a pair symbol into `(base, quote)`.
///
/// A pair with a separator (`-`, `/`, `_`) is split on it. Otherwise every
/// known quote suffix is tried, longest group first. Returns `None` when no
/// suffix matches or a leg would be empty.
///
/// Concatenated pairs can be ambiguous (`BATUSD` ends in both `TUSD` and
/// `USD`); this takes the longest suffix. Use [`split_pair_with`] when the
/// known currencies are available.
pub fn split_pair(pair: &str) -> Option<(Symbol, Symbol)> {
    split_pair_with(pair, |_| false)
}

/// Split a pair symbol, preferring the candidate with the most legs for
/// which `known` holds. Ties go to the longer quote suffix.
pub fn split_pair_with<F>(pair: &str, known: F) -> Option<(Symbol, Symbol)>
where
    F: Fn(&str) -> bool,
{
    let pair = pair.trim();
    if let Some((base, quote)) = pair.split_once(is_separator) {
        let (base, quote) = (base.trim(), quote.trim());
        if base.is_empty() || quote.is_empty() || quote.contains(is_separator) {
            return None;
        }
        return Some((Symbol::new(base), Symbol::new(quote)));
    }

    let squashed = pair.to_uppercase();
    let mut best: Option<(usize, &str, &str)> = None;

    for (len, suffixes) in QUOTE_SUFFIXES {
        if squashed.len() <= len {
            continue;
        }
        let Some(tail) = squashed.get(squashed.len() - len..) else {
            continue;
        };
        if !suffixes.contains(&tail) {
            continue;
        }
        let head = &squashed[..squashed.len() - len];
        let score = usize::from(known(head)) + usize::from(known(tail));
        if best.map_or(true, |(top, _, _)| score > top) {
            best = Some((score, head, tail));
        }
    }

    best.map(|(_, head, tail)| (Symbol::new(head), Symbol::new(tail)))
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '/' | '_')
}
