//! HTML message builders and the Telegram length splitter.

use chrono::{DateTime, Utc};
use nicp_core::{AlertType, MarketSnapshot, PricePair, Source};
use nicp_engine::{ArbitrageReport, Opportunity, Recommendation};
use std::fmt::Write;
use teloxide::utils::html::escape;

/// Telegram rejects messages above 4096 characters.
pub const MESSAGE_LIMIT: usize = 4000;

/// Split `text` into ordered parts of at most `limit` characters, breaking on
/// line boundaries. A single line longer than `limit` is cut on char boundaries,
/// never inside an HTML tag or entity.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        if line_len > limit {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
            parts.extend(hard_split(line, limit));
            continue;
        }

        let needed = if current.is_empty() { line_len } else { current_len + 1 + line_len };
        if needed > limit {
            parts.push(std::mem::take(&mut current));
            current.push_str(line);
            current_len = line_len;
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            current_len = needed;
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn hard_split(line: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());
        if end < chars.len() {
            if let Some(cut) = markup_cut(&chars[start..end]) {
                end = start + cut;
            }
        }
        parts.push(chars[start..end].iter().collect());
        start = end;
    }
    parts
}

/// Offset of the earliest tag or entity left open at the end of `chunk`.
/// `None` when the chunk is clean or the markup starts at offset 0.
fn markup_cut(chunk: &[char]) -> Option<usize> {
    let open_at = |open: char, close: char| {
        let at = chunk.iter().rposition(|&c| c == open)?;
        (!chunk[at..].contains(&close)).then_some(at)
    };
    let cut = [open_at('<', '>'), open_at('&', ';')]
        .into_iter()
        .flatten()
        .min()?;
    (cut > 0).then_some(cut)
}

/// Format price with appropriate precision based on magnitude.
pub fn format_price(price: f64) -> String {
    let abs_price = price.abs();
    if price == 0.0 {
        "0".to_string()
    } else if abs_price >= 1000.0 {
        format!("{:.2}", price)
    } else if abs_price >= 1.0 {
        format!("{:.4}", price)
    } else if abs_price >= 0.01 {
        format!("{:.6}", price)
    } else {
        format!("{:.10}", price)
    }
}

/// `$1.23M`, `$45.6K`, `$789.00`.
pub fn format_usd(amount: f64) -> String {
    if amount >= 1_000_000.0 {
        format!("${:.2}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("${:.1}K", amount / 1_000.0)
    } else {
        format!("${:.2}", amount)
    }
}

pub fn format_change(change: Option<f64>) -> String {
    match change {
        Some(c) if c > 0.0 => format!("📈 {:+.2}%", c),
        Some(c) if c < 0.0 => format!("📉 {:+.2}%", c),
        Some(_) => "➡️ 0.00%".to_string(),
        None => "➡️ N/A".to_string(),
    }
}

fn hashtag(pair: &str) -> String {
    pair.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Notification for a fired price alert.
pub fn format_price_alert(
    pair: &str,
    alert_type: AlertType,
    price: f64,
    change: f64,
    hours: i64,
    threshold: f64,
    at: DateTime<Utc>,
) -> String {
    let pair = escape(pair);
    let (title, direction, sign) = match alert_type {
        AlertType::PriceDown => ("📉 <b>PRICE ALERT", "🔻 <b>Price is DOWN", "-"),
        _ => ("🚀 <b>PRICE ALERT", "📈 <b>Price is UP", "+"),
    };
    format!(
        "{title}: {pair}</b>\n\n\
         {direction} {change:+.2}% ({hours}h)</b>\n\
         💰 Current price: {price}\n\
         ⚡ Your alert: {sign}{threshold}% threshold\n\n\
         🕒 {time}\n\n\
         #PriceAlert #{tag}",
        price = format_price(price),
        time = at.format("%Y-%m-%d %H:%M:%S UTC"),
        tag = hashtag(&pair),
    )
}

/// Channel notice for a large short-window move.
pub fn format_significant_move(pair: &str, price: f64, change: f64, hours: i64) -> String {
    format!(
        "🚨 <b>SIGNIFICANT MOVE</b>\n\n\
         🪙 <b>{}</b>\n\
         💰 Price: {}\n\
         📊 Change: {:+.2}% ({}h)",
        escape(pair),
        format_price(price),
        change,
        hours
    )
}

/// Every quote for one pair, one line per source.
pub fn format_pair_quotes(
    pair_name: &str,
    quotes: &[&PricePair],
    change: Option<f64>,
    hours: i64,
) -> String {
    let mut msg = format!("🪙 <b>{}</b>\n", escape(pair_name));
    for quote in quotes {
        let _ = writeln!(
            msg,
            "• {}: {} | vol {} | liq {}",
            quote.source,
            format_price(quote.price),
            format_usd(quote.volume_24h_usd),
            format_usd(quote.liquidity_usd)
        );
    }
    let _ = write!(msg, "{}h: {}", hours, format_change(change));
    msg
}

/// Pairs of every source, highest volume first.
pub fn format_price_list(snapshot: &MarketSnapshot, per_source: usize) -> String {
    let mut msg = String::from("📊 <b>ICP DEX Prices</b>\n");
    for (source, pairs) in &snapshot.pairs {
        let mut sorted: Vec<&PricePair> = pairs.values().collect();
        sorted.sort_by(|a, b| b.volume_24h_usd.total_cmp(&a.volume_24h_usd));

        let _ = writeln!(msg, "\n<b>{}</b> ({} pairs)", source, pairs.len());
        for pair in sorted.into_iter().take(per_source) {
            let _ = writeln!(
                msg,
                "• {}: {} ({})",
                escape(&pair.pair_name),
                format_price(pair.price),
                format_usd(pair.volume_24h_usd)
            );
        }
    }
    if let Some(at) = snapshot.updated_at {
        let _ = write!(msg, "\n🕒 {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    msg
}

fn tier_emoji(recommendation: Recommendation) -> &'static str {
    match recommendation {
        Recommendation::Excellent => "🚀",
        Recommendation::Great => "🔥",
        Recommendation::Good => "✅",
        Recommendation::Moderate => "💡",
        Recommendation::Poor => "❌",
    }
}

fn format_opportunity(msg: &mut String, rank: usize, opp: &Opportunity) {
    let arb = &opp.arbitrage;
    let nicp_bought = 1000.0 / opp.nicp_price_in_icp;
    let future_icp = nicp_bought * arb.future_value_per_unit;
    let _ = writeln!(
        msg,
        "{} <b>#{}. {}</b> ({})\n\
         • Price: {:.6} ICP per nICP\n\
         • 1,000 ICP → {:.1} nICP → {:.1} ICP after {} months\n\
         • <b>Profit: {:.1} ICP ({:.1}% / {:.1}% APY)</b>\n\
         • {}",
        tier_emoji(arb.recommendation),
        rank,
        opp.source,
        escape(&opp.pair_name),
        opp.nicp_price_in_icp,
        nicp_bought,
        future_icp,
        arb.dissolution_months,
        future_icp - 1000.0,
        arb.profit_percentage(),
        arb.annualized_percentage(),
        arb.recommendation.describe()
    );
}

/// Reply for `/discount` and the channel market update.
pub fn format_arbitrage_report(report: &ArbitrageReport, months: u32) -> String {
    let rate = &report.redemption;
    let mut msg = String::from("🎯 <b>nICP Discount Opportunities</b>\n");
    if rate.provenance.is_fallback() {
        msg.push_str("⚠️ Using fallback redemption rate, live data unavailable\n");
    } else {
        let _ = writeln!(msg, "🌊 Redemption rate ({})", rate.provenance);
    }
    let _ = writeln!(
        msg,
        "📅 1 ICP = {:.4} nICP, redeem 1 nICP for {:.4} ICP after {} months\n",
        rate.rate,
        1.0 / rate.rate,
        months
    );

    let mut viable: Vec<&Opportunity> =
        report.opportunities.iter().filter(|o| o.arbitrage.viable).collect();
    viable.sort_by(|a, b| b.arbitrage.profit_ratio.total_cmp(&a.arbitrage.profit_ratio));

    if viable.is_empty() {
        msg.push_str("❌ <b>No DEX discounts available</b>\n");
        msg.push_str("nICP is trading at or above fair value on every DEX.\n");
        for opp in &report.opportunities {
            let _ = writeln!(
                msg,
                "• {}: {:.6} ICP ({:+.1}%)",
                opp.source,
                opp.nicp_price_in_icp,
                opp.arbitrage.profit_percentage()
            );
        }
    } else {
        msg.push_str("🚀 <b>DEX discounts</b>\n\n");
        for (i, opp) in viable.iter().enumerate() {
            format_opportunity(&mut msg, i + 1, opp);
            msg.push('\n');
        }
        if let Some(best) = report.best_opportunity() {
            let _ = writeln!(
                msg,
                "📊 {} opportunities, best: {} at {:.1}%",
                report.viable_count,
                best.source,
                best.arbitrage.profit_percentage()
            );
        }
    }

    msg.push_str("\n⚠️ Funds are locked during dissolution. Not financial advice.");
    msg
}

/// One line per pair for the periodic channel update.
pub struct MarketLine {
    pub pair: String,
    pub price: f64,
    pub volume_24h_usd: f64,
    pub change: Option<f64>,
}

pub fn format_market_update(lines: &[MarketLine], at: DateTime<Utc>) -> String {
    let mut msg = String::from("📊 <b>ICP Market Update</b>\n\n");
    for line in lines {
        let _ = writeln!(
            msg,
            "🪙 <b>{}</b>\n💰 {} {}\n📊 Volume: {}\n",
            escape(&line.pair),
            format_price(line.price),
            format_change(line.change),
            format_usd(line.volume_24h_usd)
        );
    }
    let _ = write!(msg, "🕒 {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    msg
}

/// Per-source connectivity plus redemption-rate provenance.
pub fn format_health(snapshot: &MarketSnapshot) -> String {
    let mut msg = String::from("🩺 <b>System Status</b>\n\n");
    for &source in Source::all() {
        match snapshot.health.get(&source) {
            Some(h) if h.connected => {
                let _ = writeln!(msg, "✅ {}: {} pairs", source, h.pair_count);
            }
            Some(h) => {
                let reason = h.last_error.as_deref().unwrap_or("unreachable");
                let _ = writeln!(msg, "❌ {}: {}", source, escape(reason));
            }
            None => {
                let _ = writeln!(msg, "⏳ {}: not checked yet", source);
            }
        }
    }
    match &snapshot.redemption {
        Some(rate) => {
            let _ = writeln!(msg, "🌊 Redemption rate: {:.7} ({})", rate.rate, rate.provenance);
        }
        None => msg.push_str("🌊 Redemption rate: not fetched yet\n"),
    }
    match snapshot.updated_at {
        Some(at) => {
            let _ = write!(msg, "🕒 Last update: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => msg.push_str("🕒 No price data yet"),
    }
    msg
}

pub const NO_DATA_REPLY: &str =
    "❌ <b>No data available</b>\n\nPrice data has not been fetched yet. Please try again in a few minutes.\n💡 Use /status to check source health.";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nicp_core::{PairMap, RateProvenance, RedemptionRate};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_split_short_message_untouched() {
        assert_eq!(split_message("hello\nworld", 4000), vec!["hello\nworld"]);
        assert!(split_message("", 4000).is_empty());
    }

    #[test]
    fn test_split_on_line_boundaries_in_order() {
        let text = (0..10).map(|i| format!("line {i:02}")).collect::<Vec<_>>().join("\n");
        let parts = split_message(&text, 24);
        assert!(parts.iter().all(|p| p.chars().count() <= 24));
        assert_eq!(parts.join("\n"), text);
        assert_eq!(parts[0], "line 00\nline 01\nline 02");
    }

    #[test]
    fn test_split_hard_cuts_long_line() {
        let long = "é".repeat(10);
        let parts = split_message(&format!("a\n{long}\nb"), 4);
        assert_eq!(parts, vec!["a", "éééé", "éééé", "éé", "b"]);
    }

    #[test]
    fn test_split_hard_cut_keeps_markup_whole() {
        let parts = split_message("x <b>bold</b>", 4);
        assert_eq!(parts, vec!["x ", "<b>b", "old", "</b>"]);

        let parts = split_message("Tom &amp; Jerry", 8);
        assert_eq!(parts, vec!["Tom ", "&amp; Je", "rry"]);
        assert_eq!(parts.concat(), "Tom &amp; Jerry");
    }

    #[test]
    fn test_split_report_sized_text() {
        let line = "x".repeat(99);
        let text = vec![line.as_str(); 100].join("\n");
        let parts = split_message(&text, MESSAGE_LIMIT);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.chars().count() <= MESSAGE_LIMIT));
    }

    #[test]
    fn test_format_price_precision() {
        assert_eq!(format_price(1234.5678), "1234.57");
        assert_eq!(format_price(4.8), "4.8000");
        assert_eq!(format_price(0.979), "0.979000");
        assert_eq!(format_price(0.0), "0");
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(2_500_000.0), "$2.50M");
        assert_eq!(format_usd(50_000.0), "$50.0K");
        assert_eq!(format_usd(12.0), "$12.00");
    }

    #[test]
    fn test_price_alert_message() {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let msg = format_price_alert("NICP/ICP", AlertType::PriceUp, 0.97, 2.105, 24, 2.0, at);
        assert!(msg.contains("<b>PRICE ALERT: NICP/ICP</b>"));
        assert!(msg.contains("+2.11% (24h)"));
        assert!(msg.contains("+2% threshold"));
        assert!(msg.contains("#NICPICP"));

        let down = format_price_alert("NICP/ICP", AlertType::PriceDown, 0.9, -6.0, 6, 5.0, at);
        assert!(down.contains("DOWN -6.00% (6h)"));
        assert!(down.contains("-5% threshold"));
    }

    fn nicp_pair(price: f64) -> PricePair {
        PricePair {
            pair_name: "NICP/ICP".into(),
            base: "NICP".into(),
            quote: "ICP".into(),
            base_id: "b".into(),
            quote_id: "q".into(),
            price,
            volume_24h_usd: 50_000.0,
            liquidity_usd: 200_000.0,
            source: Source::IcpSwap,
            raw_payload: serde_json::Value::Null,
        }
    }

    fn report(price: f64, provenance: RateProvenance) -> ArbitrageReport {
        let pair = nicp_pair(price);
        let mut pairs = PairMap::new();
        pairs.insert(pair.pair_name.clone(), pair);
        let mut by_source = BTreeMap::new();
        by_source.insert(Source::IcpSwap, pairs);
        let rate = RedemptionRate {
            rate: 0.9001103,
            provenance,
            reserves: None,
            fetched_at: Utc::now(),
        };
        ArbitrageReport::build(&by_source, &rate, 6)
    }

    #[test]
    fn test_report_lists_viable_opportunity() {
        let msg = format_arbitrage_report(&report(0.979, RateProvenance::Live), 6);
        assert!(msg.contains("#1. ICPSwap"));
        assert!(msg.contains("13.5%"));
        assert!(!msg.contains("fallback"));
    }

    #[test]
    fn test_report_warns_on_fallback_rate() {
        let msg = format_arbitrage_report(&report(1.2, RateProvenance::FallbackDefault), 6);
        assert!(msg.contains("fallback redemption rate"));
        assert!(msg.contains("No DEX discounts available"));
    }

    #[test]
    fn test_pair_quotes_label_the_change_window() {
        let pair = nicp_pair(0.979);
        let msg = format_pair_quotes("NICP/ICP", &[&pair], Some(1.5), 6);
        assert!(msg.contains("• ICPSwap: 0.979000"));
        assert!(msg.ends_with("6h: 📈 +1.50%"));

        let msg = format_pair_quotes("NICP/ICP", &[&pair], None, 24);
        assert!(msg.ends_with("24h: ➡️ N/A"));
    }

    #[test]
    fn test_health_lists_every_source() {
        let msg = format_health(&MarketSnapshot::default());
        assert!(msg.contains("ICPSwap: not checked yet"));
        assert!(msg.contains("KongSwap: not checked yet"));
        assert!(msg.contains("No price data yet"));
    }
}
