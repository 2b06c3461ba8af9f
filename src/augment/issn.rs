// src/augment/issn.rs
use once_cell::sync::OnceCell;
use regex::Regex;

/// `NNNN-NNNC` or `NNNNNNNC` (C may be `x`) normalized to `NNNN-NNNC`.
/// Anything else, such as two ISSNs run together, yields `None`.
pub fn normalize_issn(raw: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"^(\d{4})-?(\d{3}[\dXx])$").unwrap());
    let caps = re.captures(raw.trim())?;
    Some(format!("{}-{}", &caps[1], caps[2].to_ascii_uppercase()))
}
