/// Free-text and image path cleaning for roster output
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    static ref SCRIPT_BLOCK: Regex =
        Regex::new(r"(?is)<script\b[^>]*>.*?(?:</script\s*>|\z)").expect("valid script pattern");
    static ref STYLE_BLOCK: Regex =
        Regex::new(r"(?is)<style\b[^>]*>.*?(?:</style\s*>|\z)").expect("valid style pattern");
    static ref TAG_PATTERN: Regex = Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern");
    static ref BASE_URL: Url = Url::parse("http://example.com/").expect("valid base url");
}

/// Remove every markup tag, leaving plain text. Script and style
/// elements go with their contents.
pub fn strip_markup(input: &str) -> String {
    let input = SCRIPT_BLOCK.replace_all(input, "");
    let input = STYLE_BLOCK.replace_all(&input, "");
    TAG_PATTERN
        .replace_all(&input, "")
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Keep an image path only if it parses as a relative or http(s) URL
pub fn clean_image_path(raw: Option<&str>) -> Option<String> {
    let stripped = strip_markup(raw?);
    if stripped.is_empty() {
        return None;
    }

    match BASE_URL.join(&stripped) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(stripped),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<b>Ada</b> Lovelace"), "Ada Lovelace");
        assert_eq!(strip_markup("<script>alert(1)</script>"), "");
        assert_eq!(strip_markup("Pia<SCRIPT type=\"x\">steal()</Script >"), "Pia");
        assert_eq!(strip_markup("<style>b { color: red }</style>Cole"), "Cole");
        assert_eq!(strip_markup("Sam<script>never closed"), "Sam");
        assert_eq!(strip_markup("<img src=x onerror=\"boom\">"), "");
        assert_eq!(strip_markup("a < b"), "a  b");
        assert_eq!(strip_markup("  plain  "), "plain");
    }

    #[test]
    fn test_clean_image_path() {
        assert_eq!(clean_image_path(None), None);
        assert_eq!(clean_image_path(Some("")), None);
        assert_eq!(
            clean_image_path(Some("/uploads/profile/7.png")).as_deref(),
            Some("/uploads/profile/7.png")
        );
        assert_eq!(
            clean_image_path(Some("https://cdn.example.org/a.jpg")).as_deref(),
            Some("https://cdn.example.org/a.jpg")
        );
        assert_eq!(clean_image_path(Some("javascript:alert(1)")), None);
        assert_eq!(clean_image_path(Some("http://[::1")), None);
        assert_eq!(
            clean_image_path(Some("<b>/uploads/x.png</b>")).as_deref(),
            Some("/uploads/x.png")
        );
    }
}
