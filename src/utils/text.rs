use regex::Regex;

/// Normalize a keyword for case-insensitive matching and duplicate detection.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title-only keyword matching with whole-word boundaries.
///
/// Guards the keyword "uhr" against timestamp false positives such as
/// "07:39 Uhr" in listing titles.
pub fn matches_keyword(title: &str, keyword: &str) -> bool {
    let norm_title = title.to_lowercase();
    let norm_keyword = normalize_keyword(keyword);

    if norm_keyword.is_empty() {
        return false;
    }

    let pattern = format!(r"\b{}\b", regex::escape(&norm_keyword));
    let Ok(re) = Regex::new(&pattern) else {
        return false;
    };

    if !re.is_match(&norm_title) {
        return false;
    }

    if norm_keyword == "uhr" {
        if let Ok(time_re) = Regex::new(r"\b\d{1,2}:\d{2}\s+uhr\b") {
            if time_re.is_match(&norm_title) {
                return false;
            }
        }
    }

    true
}
