use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// # NDOC
/// component: `subsystems::mail_trace::normalize`
/// purpose: Pure address-string functions (C1). No IO, no randomness;
///   the matcher, identity layer, and staging dedupe all depend on these
///   being deterministic.

static STREET_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("street", "street"),
        ("st", "street"),
        ("st.", "street"),
        ("road", "road"),
        ("rd", "road"),
        ("rd.", "road"),
        ("avenue", "avenue"),
        ("ave", "avenue"),
        ("ave.", "avenue"),
        ("av", "avenue"),
        ("av.", "avenue"),
        ("boulevard", "boulevard"),
        ("blvd", "boulevard"),
        ("blvd.", "boulevard"),
        ("lane", "lane"),
        ("ln", "lane"),
        ("ln.", "lane"),
        ("drive", "drive"),
        ("dr", "drive"),
        ("dr.", "drive"),
        ("court", "court"),
        ("ct", "court"),
        ("ct.", "court"),
        ("circle", "circle"),
        ("cir", "circle"),
        ("cir.", "circle"),
        ("parkway", "parkway"),
        ("pkwy", "parkway"),
        ("pkwy.", "parkway"),
        ("highway", "highway"),
        ("hwy", "highway"),
        ("hwy.", "highway"),
        ("terrace", "terrace"),
        ("ter", "terrace"),
        ("ter.", "terrace"),
        ("place", "place"),
        ("pl", "place"),
        ("pl.", "place"),
        ("way", "way"),
        ("wy", "way"),
        ("wy.", "way"),
        ("trail", "trail"),
        ("trl", "trail"),
        ("trl.", "trail"),
        ("alley", "alley"),
        ("aly", "alley"),
        ("aly.", "alley"),
        ("common", "common"),
        ("cmn", "common"),
        ("cmn.", "common"),
        ("park", "park"),
    ])
});

static DIRECTIONALS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("n", "north"),
        ("n.", "north"),
        ("north", "north"),
        ("s", "south"),
        ("s.", "south"),
        ("south", "south"),
        ("e", "east"),
        ("e.", "east"),
        ("east", "east"),
        ("w", "west"),
        ("w.", "west"),
        ("west", "west"),
        ("ne", "northeast"),
        ("ne.", "northeast"),
        ("nw", "northwest"),
        ("nw.", "northwest"),
        ("se", "southeast"),
        ("se.", "southeast"),
        ("sw", "southwest"),
        ("sw.", "southwest"),
    ])
});

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static NON_WORD_KEEP_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w#\s]").expect("non-word regex"));
static ZIP_DIGITS_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D+").expect("zip regex"));

fn squash_ws(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").to_string()
}

fn norm_token(tok: &str) -> String {
    let t = tok.to_lowercase();
    let t = t.trim_matches(|c| c == '.' || c == ',');
    if let Some(v) = STREET_TYPES.get(t) {
        return (*v).to_string();
    }
    if let Some(v) = DIRECTIONALS.get(t) {
        return (*v).to_string();
    }
    t.to_string()
}

/// Lowercases, replaces `-` with space, strips non-word chars (keeping `#`
/// for unit numbers), tokenizes, then canonicalizes each token against
/// `STREET_TYPES`/`DIRECTIONALS`. Returns `""` for empty input.
pub fn normalize_address1(s: &str) -> String {
    let replaced = s.replace('-', " ");
    let stripped = NON_WORD_KEEP_HASH_RE.replace_all(&replaced, " ");
    let parts: Vec<String> = stripped
        .to_lowercase()
        .split_whitespace()
        .map(norm_token)
        .collect();
    squash_ws(&parts.join(" "))
}

/// `"<first-token>|<second-token-initial>"`, lowercase. Empty string if
/// `addr1` has no tokens.
pub fn block_key(addr1_normalized: &str) -> String {
    let toks: Vec<&str> = squash_ws(addr1_normalized).split_whitespace().collect();
    if toks.is_empty() {
        return String::new();
    }
    let first = toks[0];
    let second_initial = toks
        .get(1)
        .and_then(|s| s.chars().next())
        .map(|c| c.to_string())
        .unwrap_or_default();
    format!("{}|{}", first, second_initial).to_lowercase()
}

/// First 5 numeric digits of a ZIP/ZIP+4, preserving leading zeros.
/// `""` if none found.
pub fn zip5(z: &str) -> String {
    let s = z.trim();
    if s.is_empty() {
        return String::new();
    }
    let digits = ZIP_DIGITS_ONLY_RE.replace_all(s, "");
    digits.chars().take(5).collect()
}

/// Stable lowercased address identity used for hashing and display:
/// normalized address1, raw address2, city, state, zip5, whitespace
/// collapsed.
pub fn build_full_address(addr1: &str, addr2: Option<&str>, city: &str, state: &str, zip: &str) -> String {
    let a1 = normalize_address1(addr1);
    let parts = [
        a1.as_str(),
        addr2.unwrap_or("").trim(),
        city.trim(),
        state.trim(),
        &zip5(zip),
    ];
    squash_ws(&parts.join(" ")).to_lowercase()
}

/// Tokenized view of a (not-yet-normalized) address1 string.
pub fn tokens(s: &str) -> Vec<String> {
    normalize_address1(s)
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Returns the canonical street type present at the end of a token list,
/// if any (e.g. `"street"`, `"avenue"`).
pub fn street_type_of(tok_list: &[String]) -> Option<String> {
    let last = tok_list.last()?;
    if STREET_TYPES.values().any(|v| v == last) {
        Some(last.clone())
    } else {
        None
    }
}

/// Returns the canonical directional present anywhere in a token list,
/// if any.
pub fn directional_in(tok_list: &[String]) -> Option<String> {
    tok_list
        .iter()
        .find(|t| DIRECTIONALS.values().any(|v| v == *t))
        .cloned()
}

/// Token-set ratio (0.0-1.0) between two raw strings via `rapidfuzz`,
/// with empty-string handling pinned to 0.0 rather than the library's own
/// edge-case behavior.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let a = a.trim();
    let b = b.trim();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    rapidfuzz::fuzz::token_set_ratio(a.chars(), b.chars()) / 100.0
}

/// Similarity between two raw (not pre-normalized) address1 strings: each
/// side is run through `normalize_address1` first, then scored with
/// `token_set_ratio`.
pub fn address_similarity(a1: &str, b1: &str) -> f64 {
    let na = normalize_address1(a1);
    let nb = normalize_address1(b1);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    token_set_ratio(&na, &nb)
}
