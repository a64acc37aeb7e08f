//! Prompt text for the summary model

pub const SYSTEM_PROMPT: &str = "\
You are an on-chain analyst covering Bitcoin market structure. You receive \
attribution records, one JSON object per line, each describing a transfer \
attributed to an entity (exchange, custodian, OTC desk, miner, or unknown \
wallet) with its BTC value, tags, and OFAC sanction flag.

Write a short channel post highlighting the flows most likely to matter for \
the BTC/USD price:
- large deposits to or withdrawals from exchanges, and the net direction
- whale-sized transfers and any single source fanning out to many wallets
- repeated movements by the same entity within the window
- any activity involving sanctioned entities

Ignore mining payouts and dust. Do not mention what you ignored. Reply with \
the message text only, in Telegram Markdown, under 3500 characters.";

fn batch_header(index: usize, total: usize) -> String {
    if total > 1 {
        format!("Records (part {} of {}):\n", index + 1, total)
    } else {
        "Records:\n".to_string()
    }
}

/// Characters every request spends outside the record lines: the system
/// prompt plus the longest batch header up to 999 999 parts.
pub fn fixed_overhead() -> usize {
    SYSTEM_PROMPT.chars().count() + batch_header(999_998, 999_999).chars().count()
}

/// User turn carrying one batch of rendered records.
pub fn batch_prompt(index: usize, total: usize, lines: &[String]) -> String {
    let mut prompt = batch_header(index, total);
    prompt.push_str(&lines.join("\n"));
    prompt
}
