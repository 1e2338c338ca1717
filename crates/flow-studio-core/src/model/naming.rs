//! Default labels for dropped nodes (`"Untitled {n}"`) and flow slugs.

/// Label prefix shared by default node labels and the placeholder flow name.
pub const PLACEHOLDER_NAME: &str = "Untitled";

/// Digits after `"Untitled "`, when the label has exactly that shape.
fn suffix_digits(label: &str) -> Option<&str> {
    let digits = label.strip_prefix(PLACEHOLDER_NAME)?.strip_prefix(' ')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0" } else { trimmed })
}

/// Numeric suffix of a label of the exact form `"Untitled <number>"`. `None` when the suffix
/// does not fit in a `u64`.
pub fn untitled_suffix(label: &str) -> Option<u64> {
    suffix_digits(label)?.parse().ok()
}

/// Decimal increment of a digit string without leading zeros.
fn increment_digits(digits: &str) -> String {
    let mut out: Vec<u8> = digits.bytes().collect();
    for byte in out.iter_mut().rev() {
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            return String::from_utf8_lossy(&out).into_owned();
        }
    }
    out.insert(0, b'1');
    String::from_utf8_lossy(&out).into_owned()
}

/// Next default label: one more than the largest existing `"Untitled <n>"` suffix.
///
/// Recomputed from the labels currently in the graph, so deleting `"Untitled 2"` out of
/// 1..=3 still yields `"Untitled 4"`. Suffixes are compared as digit strings, so arbitrarily
/// long ones still order correctly.
pub fn next_default_label<'a>(labels: impl IntoIterator<Item = &'a str>) -> String {
    let max = labels
        .into_iter()
        .filter_map(suffix_digits)
        .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
        .unwrap_or("0");
    format!("{PLACEHOLDER_NAME} {}", increment_digits(max))
}

/// URL-safe slug: lowercase ASCII alphanumerics separated by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
