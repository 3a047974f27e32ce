// 🔤 Name Normalizer - canonical text for cross-source label matching
//
// "São Bernardo  do Campo", "SAO BERNARDO DO CAMPO" and " sao bernardo do campo "
// all normalize to "sao bernardo do campo".

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalize a free-text label: lowercase, strip diacritics, trim, and
/// collapse internal whitespace runs to a single space.
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Null-tolerant variant: a missing label normalizes to the empty string.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_diacritics_and_case() {
        assert_eq!(normalize("São Bernardo do Campo"), "sao bernardo do campo");
        assert_eq!(normalize("SÃO JOSÉ DOS CAMPOS"), "sao jose dos campos");
        assert_eq!(normalize("Superintendência"), "superintendencia");
    }

    #[test]
    fn test_diacritic_and_ascii_inputs_match() {
        assert_eq!(normalize("Ribeirão Preto"), normalize("RIBEIRAO PRETO"));
        assert_eq!(normalize("Mogi Guaçu"), normalize("mogi guacu"));
    }

    #[test]
    fn test_trims_and_collapses_whitespace() {
        assert_eq!(normalize("  Santos \t"), "santos");
        assert_eq!(normalize("Santa   Bárbara\nd'Oeste"), "santa barbara d'oeste");
    }

    #[test]
    fn test_missing_label_is_empty() {
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize_opt(Some("   ")), "");
        assert_eq!(normalize_opt(Some("Campinas")), "campinas");
    }

    #[test]
    fn test_precomposed_and_decomposed_forms_match() {
        // "é" as one code point vs "e" + U+0301
        assert_eq!(normalize("Jos\u{e9}"), normalize("Jose\u{301}"));
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(s in "\\PC{0,40}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn prop_normalize_is_deterministic(s in "[a-zA-ZÀ-ÿ ]{0,30}") {
            prop_assert_eq!(normalize(&s), normalize(&s));
        }
    }
}
