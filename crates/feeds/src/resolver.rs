//! Canister id to ticker symbol resolution.

use nicp_core::KNOWN_TOKENS;
use std::collections::HashMap;

/// Maps opaque ledger canister ids to human-readable symbols.
///
/// Resolution is total: unknown ids resolve to a truncated placeholder.
#[derive(Debug, Clone)]
pub struct SymbolResolver {
    table: HashMap<String, String>,
}

impl Default for SymbolResolver {
    fn default() -> Self {
        Self::from_pairs(KNOWN_TOKENS.iter().copied())
    }
}

impl SymbolResolver {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            table: pairs
                .into_iter()
                .map(|(id, symbol)| (id.to_string(), symbol.to_string()))
                .collect(),
        }
    }

    /// Adds or replaces a mapping.
    pub fn insert(&mut self, id: impl Into<String>, symbol: impl Into<String>) {
        self.table.insert(id.into(), symbol.into());
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.table.contains_key(id)
    }

    pub fn resolve(&self, id: &str) -> String {
        match self.table.get(id) {
            Some(symbol) => symbol.clone(),
            None => placeholder(id),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// `abcde...xyz` for long ids, `abcdefgh...` otherwise.
fn placeholder(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..5].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{head}...{tail}")
    } else {
        let head: String = chars.iter().take(8).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nicp_core::{ICP_LEDGER, NICP_LEDGER};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_known_ids() {
        let resolver = SymbolResolver::default();
        assert_eq!(resolver.resolve(ICP_LEDGER), "ICP");
        assert_eq!(resolver.resolve(NICP_LEDGER), "nICP");
        assert!(resolver.is_known(ICP_LEDGER));
    }

    #[test]
    fn test_long_unknown_id() {
        let resolver = SymbolResolver::default();
        assert_eq!(resolver.resolve("abcde-fghij-klmno-pqrst-uvw"), "abcde...uvw");
    }

    #[test]
    fn test_short_unknown_id() {
        let resolver = SymbolResolver::default();
        assert_eq!(resolver.resolve("shortid12345"), "shortid1...");
        assert_eq!(resolver.resolve("abc"), "abc...");
        assert_eq!(resolver.resolve(""), "...");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let resolver = SymbolResolver::default();
        for id in [ICP_LEDGER, "qwert-yuiop-asdfg-hjklz-xcv", "tiny"] {
            assert_eq!(resolver.resolve(id), resolver.resolve(id));
        }
    }

    #[test]
    fn test_custom_table() {
        let mut resolver = SymbolResolver::from_pairs([("aaaaa-aa", "TEST")]);
        assert_eq!(resolver.resolve("aaaaa-aa"), "TEST");
        resolver.insert("bbbbb-bb", "OTHER");
        assert_eq!(resolver.len(), 2);
        assert!(!resolver.is_known(ICP_LEDGER));
    }
}
