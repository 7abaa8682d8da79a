use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

pub const MASK: &str = "***";

/// Fixed block-list (ko/en/ja profanity). The list is deliberately small and
/// literal; this is an abuse damper in front of a metered upstream API, not a
/// general NSFW classifier.
const BLOCKED_TERMS: &[&str] = &[
    // Korean
    "시발", "씨발", "병신", "지랄", "새끼", "개새끼", "미친", "존나", "좆",
    // English
    "fuck", "shit", "bitch", "asshole", "bastard", "damn",
    // Japanese
    "くそ", "ちくしょう", "馬鹿",
];

/// Decomposed-jamo spellings of blocked Korean terms. Compatibility jamo
/// (U+3131..U+318E) survive NFC untouched, so "ㅅㅣㅂㅏㄹ" never recombines
/// into "시발" by normalization alone; this table closes that hole.
const JAMO_RESPELLINGS: &[(&str, &str)] = &[
    ("ㅅㅣㅂㅏㄹ", "시발"),
    ("ㅆㅣㅂㅏㄹ", "씨발"),
    ("ㅂㅕㅇㅅㅣㄴ", "병신"),
    ("ㅈㅣㄹㅏㄹ", "지랄"),
    ("ㅈㅗㄴㄴㅏ", "존나"),
    ("ㅈㅗㅈ", "좆"),
];

/// Free-text fields of the analysis result that the output pass may touch.
const OUTPUT_TEXT_FIELDS: &[&str] = &["oneLiner", "summary", "spendingPlan"];
const OUTPUT_LIST_FIELDS: &[&str] = &["insights", "warnings", "suggestions"];

fn literal_patterns() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        BLOCKED_TERMS
            .iter()
            .map(|t| Regex::new(&format!("(?i){}", regex::escape(t))).unwrap())
            .collect()
    })
}

fn spaced_patterns() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        BLOCKED_TERMS
            .iter()
            .map(|t| {
                let joined = t
                    .chars()
                    .map(|c| regex::escape(&c.to_string()))
                    .collect::<Vec<_>>()
                    .join(r"[\s.\-_]*");
                Regex::new(&format!("(?i){joined}")).unwrap()
            })
            .collect()
    })
}

fn mask_literal(text: &str) -> String {
    let mut out = text.to_string();
    for re in literal_patterns() {
        out = re.replace_all(&out, MASK).into_owned();
    }
    out
}

/// Input pass, applied to client text before it reaches the upstream prompt.
///
/// Order matters: NFC and jamo recombination must run before the literal
/// match or recombined terms would slip through, and the spacing pass runs
/// last so mask tokens from the literal pass are never re-processed.
pub fn filter_input(text: &str) -> String {
    let mut out: String = text.nfc().collect();
    for (respelled, composed) in JAMO_RESPELLINGS {
        out = out.replace(respelled, composed);
    }
    out = mask_literal(&out);
    for re in spaced_patterns() {
        out = re.replace_all(&out, MASK).into_owned();
    }
    out
}

/// Output pass. The result came from the upstream model under our own safety
/// settings, so only the literal mask runs, and only over the known free-text
/// fields. Numeric fields (risk score, saving potential) are never touched,
/// and missing fields are simply skipped.
pub fn filter_output(result: &mut Value) {
    let Some(obj) = result.as_object_mut() else {
        return;
    };
    for field in OUTPUT_TEXT_FIELDS {
        if let Some(Value::String(s)) = obj.get_mut(*field) {
            *s = mask_literal(s);
        }
    }
    for field in OUTPUT_LIST_FIELDS {
        if let Some(Value::Array(items)) = obj.get_mut(*field) {
            for item in items {
                if let Value::String(s) = item {
                    *s = mask_literal(s);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_plain_terms_in_any_case() {
        assert_eq!(filter_input("this is damn rude"), "this is *** rude");
        assert_eq!(filter_input("this is DAMN rude"), "this is *** rude");
        assert_eq!(filter_input("시발 진짜"), "*** 진짜");
    }

    #[test]
    fn masks_spaced_and_punctuated_evasions() {
        assert_eq!(filter_input("시 발"), MASK);
        assert_eq!(filter_input("시.발 진짜"), "*** 진짜");
        assert_eq!(filter_input("f u c k this"), "*** this");
        assert_eq!(filter_input("s-h_i.t"), MASK);
    }

    #[test]
    fn recombines_decomposed_jamo_before_matching() {
        assert_eq!(filter_input("ㅅㅣㅂㅏㄹ"), MASK);
        assert_eq!(filter_input("ㅆㅣㅂㅏㄹ 진짜"), "*** 진짜");
    }

    #[test]
    fn composes_combining_forms_before_matching() {
        // "damn" with 'a' written as 'a' + COMBINING DIAERESIS would not be a
        // literal hit; NFC folds a + U+0300 into a precomposed char, so check
        // the normalization path with decomposed Hangul syllables instead.
        let decomposed = "\u{1109}\u{1175}\u{1107}\u{1161}\u{11af}"; // 시발 as conjoining jamo
        assert_eq!(filter_input(decomposed), MASK);
    }

    #[test]
    fn filtering_is_idempotent_and_leaves_masks_alone() {
        let once = filter_input("시 발 and fuck, but budget is fine");
        let twice = filter_input(&once);
        assert_eq!(once, twice);
        assert_eq!(filter_input("totals: 3 *** 4"), "totals: 3 *** 4");
    }

    #[test]
    fn clean_text_passes_through_unchanged() {
        let text = "점심 12,000원, 커피 4,500원. 남은 예산 괜찮을까요?";
        assert_eq!(filter_input(text), text);
    }

    #[test]
    fn output_masks_only_known_text_fields() {
        let mut result = json!({
            "oneLiner": "damn, your wallet is crying",
            "summary": "clean",
            "insights": ["shit happens", "coffee is 40%"],
            "pattern": { "riskLevel": "high", "savingPotential": 10000 },
            "extra": 7
        });
        filter_output(&mut result);
        assert_eq!(result["oneLiner"], "***, your wallet is crying");
        assert_eq!(result["summary"], "clean");
        assert_eq!(result["insights"][0], "*** happens");
        assert_eq!(result["insights"][1], "coffee is 40%");
        assert_eq!(result["pattern"]["savingPotential"], 10000);
        assert_eq!(result["extra"], 7);
    }

    #[test]
    fn output_skips_missing_fields() {
        let mut result = json!({ "summary": "fuck" });
        filter_output(&mut result);
        assert_eq!(result["summary"], MASK);
        assert!(result.get("oneLiner").is_none());
    }
}
