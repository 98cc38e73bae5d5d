//! Known ICP ledger canisters.

/// ICP ledger.
pub const ICP_LEDGER: &str = "ryjl3-tyaaa-aaaaa-aaaba-cai";
/// WaterNeuron nICP ledger.
pub const NICP_LEDGER: &str = "buwm7-7yaaa-aaaar-qagva-cai";
pub const CKUSDT_LEDGER: &str = "cngnf-vqaaa-aaaar-qag4q-cai";
pub const CKUSDC_LEDGER: &str = "xevnm-gaaaa-aaaar-qafnq-cai";
pub const CKBTC_LEDGER: &str = "mxzaz-hqaaa-aaaar-qaada-cai";
pub const CKETH_LEDGER: &str = "ss2fx-dyaaa-aaaar-qacoq-cai";

/// Default canister id to symbol table.
pub const KNOWN_TOKENS: &[(&str, &str)] = &[
    (ICP_LEDGER, "ICP"),
    (NICP_LEDGER, "nICP"),
    (CKUSDT_LEDGER, "ckUSDT"),
    (CKUSDC_LEDGER, "ckUSDC"),
    (CKBTC_LEDGER, "ckBTC"),
    (CKETH_LEDGER, "ckETH"),
    ("jcmow-hyaaa-aaaaq-aadlq-cai", "WTN"),
    ("np5km-uyaaa-aaaaq-aadrq-cai", "KINIC"),
    ("7pail-xaaaa-aaaas-aabmq-cai", "BOB"),
    ("2ouva-viaaa-aaaaq-aaamq-cai", "CHAT"),
    ("zfcdd-tqaaa-aaaaq-aaaga-cai", "SNS1"),
];

/// Symbols pegged to one US dollar.
pub const USD_STABLE_SYMBOLS: &[&str] = &["CKUSDT", "CKUSDC"];

/// Canonical (uppercase) nICP symbol used in pair names.
pub const NICP_SYMBOL: &str = "NICP";
/// Canonical (uppercase) ICP symbol used in pair names.
pub const ICP_SYMBOL: &str = "ICP";

/// Builds the canonical `BASE/QUOTE` pair name.
pub fn pair_name(base: &str, quote: &str) -> String {
    format!("{}/{}", base.to_uppercase(), quote.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_name_uppercases() {
        assert_eq!(pair_name("nICP", "ICP"), "NICP/ICP");
        assert_eq!(pair_name("ckUSDT", "icp"), "CKUSDT/ICP");
    }

    #[test]
    fn test_known_tokens_unique_ids() {
        let mut ids: Vec<&str> = KNOWN_TOKENS.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), KNOWN_TOKENS.len());
    }
}
