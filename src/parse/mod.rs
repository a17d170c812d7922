// src/parse/mod.rs
pub mod html;
pub mod relnotes;

/// First human-formatted count in `s` (`"1,234 567 (est.)"` -> `1234567`).
pub fn parse_count(s: &str) -> Option<u64> {
    let mut digits = String::new();
    for c in s.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ',' | ' ' | '\u{a0}' if !digits.is_empty() => {}
            _ if digits.is_empty() => {}
            _ => break,
        }
    }
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_count_ignores_separators() {
        assert_eq!(parse_count("1,234 567"), Some(1_234_567));
        assert_eq!(parse_count("~2,000 (est. 3)"), Some(2000));
        assert_eq!(parse_count("n/a"), None);
    }
}
