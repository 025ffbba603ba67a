use once_cell::sync::Lazy;
use pinyin::ToPinyin;
use regex::Regex;

fn is_han(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

fn punctuation_name(c: char) -> Option<&'static str> {
    match c {
        '，' => Some("dou"),
        '。' => Some("ju"),
        '！' => Some("tan"),
        '？' => Some("wen"),
        '；' => Some("fen"),
        '：' => Some("mao"),
        '"' | '"' | '\u{2018}' | '\u{2019}' => Some("yin"),
        '（' | '）' | '【' | '】' => Some("kuo"),
        '、' => Some("dun"),
        _ => None,
    }
}

static ANNOTATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([a-z]+\)").unwrap());

/// Per-character phonetic annotation: `"字"` becomes `"字(zi)"`. Han
/// characters get their tone-less pinyin reading; CJK punctuation
/// optionally gets a fixed romanized name; everything else passes through.
#[derive(Debug, Clone, Copy)]
pub struct PinyinAnnotator {
    pub annotate_punctuation: bool,
}

impl Default for PinyinAnnotator {
    fn default() -> Self {
        Self {
            annotate_punctuation: true,
        }
    }
}

impl PinyinAnnotator {
    pub fn annotate(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut out = String::with_capacity(text.len() * 2);
        for c in text.chars() {
            out.push(c);
            if is_han(c) {
                if let Some(py) = c.to_pinyin() {
                    out.push('(');
                    out.push_str(py.plain());
                    out.push(')');
                }
            } else if self.annotate_punctuation {
                if let Some(name) = punctuation_name(c) {
                    out.push('(');
                    out.push_str(name);
                    out.push(')');
                }
            }
        }
        out
    }

    pub fn annotate_batch(&self, texts: &[String]) -> Vec<String> {
        texts.iter().map(|t| self.annotate(t)).collect()
    }

    /// Strips `(lowercase-letters)` annotation groups, recovering the raw
    /// text an [`annotate`](Self::annotate) call produced it from.
    pub fn remove_annotations(&self, text: &str) -> String {
        ANNOTATION.replace_all(text, "").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotates_han_characters_with_plain_pinyin() {
        let annotator = PinyinAnnotator::default();
        assert_eq!(annotator.annotate("汉字"), "汉(han)字(zi)");
    }

    #[test]
    fn annotates_punctuation_when_enabled() {
        let annotator = PinyinAnnotator::default();
        assert_eq!(annotator.annotate("你好，"), "你(ni)好(hao)，(dou)");
    }

    #[test]
    fn skips_punctuation_annotation_when_disabled() {
        let annotator = PinyinAnnotator {
            annotate_punctuation: false,
        };
        assert_eq!(annotator.annotate("你好，"), "你(ni)好(hao)，");
    }

    #[test]
    fn passes_through_latin_text_unannotated() {
        let annotator = PinyinAnnotator::default();
        assert_eq!(annotator.annotate("hello"), "hello");
    }

    #[test]
    fn remove_annotations_recovers_raw_text() {
        let annotator = PinyinAnnotator::default();
        let annotated = annotator.annotate("汉字，");
        assert_eq!(annotator.remove_annotations(&annotated), "汉字，");
    }
}
