use once_cell::sync::Lazy;
use regex::Regex;

/// Decodes the handful of HTML entities that show up in scraped article
/// bodies. Not a general-purpose HTML entity decoder.
fn decode_html_entities(text: &str) -> String {
    static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(x?[0-9a-fA-F]+);").unwrap());

    let text = text
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    NUMERIC
        .replace_all(&text, |caps: &regex::Captures| {
            let digits = &caps[1];
            let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                digits.parse().ok()
            };
            code.and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

const AD_KEYWORDS: &[&str] = &[
    "广告", "推广", "点击查看", "立即购买", "免费领取", "加微信", "加QQ", "扫码", "二维码",
    "客服电话", "版权所有", "Copyright", "备案号", "ICP备", "联系我们", "关于我们", "友情链接",
    "网站地图",
];

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static MULTI_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn strip_control_chars(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let code = c as u32;
            !((0x00..=0x08).contains(&code)
                || code == 0x0b
                || code == 0x0c
                || (0x0e..=0x1f).contains(&code)
                || code == 0x7f)
        })
        .collect()
}

/// Fixed text-cleaning pipeline: HTML-entity decode, strip tags, strip
/// control characters, collapse whitespace, trim, truncate.
#[derive(Debug, Clone)]
pub struct TextCleaner {
    pub min_length: usize,
    pub max_length: usize,
    pub remove_html: bool,
    pub filter_ads: bool,
    pub ad_keywords: Vec<String>,
}

impl Default for TextCleaner {
    fn default() -> Self {
        Self {
            min_length: 10,
            max_length: 5000,
            remove_html: true,
            filter_ads: true,
            ad_keywords: AD_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TextCleaner {
    pub fn clean(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut text = decode_html_entities(text);

        if self.remove_html {
            text = HTML_TAG.replace_all(&text, "").into_owned();
        }

        text = strip_control_chars(&text);
        text = MULTI_SPACE.replace_all(&text, " ").into_owned();
        text = MULTI_NEWLINE.replace_all(&text, "\n\n").into_owned();
        text = text.trim().to_string();

        if self.max_length > 0 && text.chars().count() > self.max_length {
            text = text.chars().take(self.max_length).collect();
        }

        text
    }

    /// Cleans a paragraph, additionally rejecting ones that end up too
    /// short or contain an ad keyword. Returns `None` for either case.
    pub fn clean_paragraph(&self, text: &str) -> Option<String> {
        let cleaned = self.clean(text);
        if cleaned.chars().count() < self.min_length {
            return None;
        }
        if self.filter_ads && self.contains_ad(&cleaned) {
            return None;
        }
        Some(cleaned)
    }

    pub fn clean_paragraphs(&self, texts: &[String]) -> Vec<String> {
        texts
            .iter()
            .filter_map(|t| self.clean_paragraph(t))
            .collect()
    }

    fn contains_ad(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.ad_keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_tags_and_decodes_entities() {
        let cleaner = TextCleaner::default();
        let cleaned = cleaner.clean("<p>hello&nbsp;world</p>");
        assert_eq!(cleaned, "hello\u{a0}world");
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        let cleaner = TextCleaner::default();
        let cleaned = cleaner.clean("  a   b\n\n\n\nc  ");
        assert_eq!(cleaned, "a b\n\nc");
    }

    #[test]
    fn rejects_paragraphs_shorter_than_min_length() {
        let cleaner = TextCleaner::default();
        assert_eq!(cleaner.clean_paragraph("short"), None);
    }

    #[test]
    fn rejects_paragraphs_containing_ad_keywords() {
        let cleaner = TextCleaner::default();
        assert_eq!(
            cleaner.clean_paragraph("this is an ad: 加微信 1234567890 for more"),
            None
        );
    }

    #[test]
    fn truncates_to_max_length() {
        let cleaner = TextCleaner {
            max_length: 5,
            min_length: 0,
            ..TextCleaner::default()
        };
        assert_eq!(cleaner.clean("abcdefgh"), "abcde");
    }
}
