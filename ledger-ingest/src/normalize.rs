//! Text normalizer and corruption repair
//!
//! Ledger extracts arrive with accented characters mangled by a historical
//! encoding mismatch (`GESTÇŸO` for `GESTÃO`), stray carriage returns and
//! inconsistent delimiters. Everything here is a pure function over text.
//!
//! Two renderings matter downstream:
//! - the *canonical form* of a planning key, `"* A * B * C *"`, used for exact
//!   comparisons and storage
//! - the *comparison form*, lowercase and diacritic-free, used only for
//!   substring lookups and never stored

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Sentinel for a field that carried no value
pub const NOT_INFORMED: &str = "NÃO INFORMADO";

/// Sentinel for a narrative no cascade tier could classify
pub const NOT_IDENTIFIED: &str = "NÃO IDENTIFICADO";

/// Override value meaning "intentionally ignored"; replicated across segments
pub const IGNORED_MARKER: &str = "#";

/// Legacy "ignored" label, passed through untouched like the sentinels
pub const IGNORED_LABEL: &str = "IGNORADO";

/// Segment delimiter of planning keys
pub const KEY_DELIMITER: char = '*';

/// Known corrupted sequences, applied in table order
///
/// The first block holds whole-token corrections collected from real
/// extracts; the second holds the character-level sequences they are made
/// of, so corrupted text outside the curated tokens is repaired too. Some
/// entries are prefixes of others; order is significant.
pub const CORRUPTION_TABLE: &[(&str, &str)] = &[
    ("GESTÇŸO_INOVAÇÎÇŸO", "GESTÃO_INOVAÇÃO"),
    ("P_GESTÇŸO_", "P_GESTÃO_"),
    ("E_GESTÇŸO_ESCOLAR", "E_GESTÃO_ESCOLAR"),
    ("E_GESTÇŸO_DO_PATRIM", "E_GESTÃO_DO_PATRIM"),
    ("E_VALORIZAÇÎÇŸO_PROF", "E_VALORIZAÇÃO_PROF"),
    ("VALORIZAÇÎÇŸO_PRO", "VALORIZAÇÃO_PRO"),
    ("_GESTÇŸO_ESCOLAR", "_GESTÃO_ESCOLAR"),
    ("_GESTÇŸO_PATRIM", "_GESTÃO_PATRIM"),
    ("_ALFABETIZAÇÎÇŸO", "_ALFABETIZAÇÃO"),
    ("E_ENSINO_MÇ%DIO", "E_ENSINO_MÉDIO"),
    ("_NOVO_ENSINO_MÇ%D", "_NOVO_ENSINO_MÉD"),
    ("CURRÇ?CULO", "CURRÍCULO"),
    ("CURRÇ¸CULO", "CURRÍCULO"),
    ("INFRAESTUTURA", "INFRAESTRUTURA"),
    // Character-level sequences
    ("ÇŸ", "Ã"),
    ("ÇÎ", "Ç"),
    ("Ç%", "É"),
    ("Çõ", "ç"),
    ("Çœ", "ã"),
    ("Çð", "í"),
    ("Çü", "ó"),
    ("Ç\u{AD}", "á"),
    ("Ç¦", "ê"),
    ("Ç§", "ú"),
    ("Ç¸", "é"),
    ("N¶§", "Nº"),
    ("N¶ø", "Nº"),
];

static STAR_SPACING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+\*\s+").expect("invalid star spacing regex"));

static STAR_ANY_SPACING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\*\s*").expect("invalid star regex"));

static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s,./\-|*]").expect("invalid disallowed chars regex"));

static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1f\x7f]").expect("invalid control chars regex"));

static NON_ALNUM_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("invalid field name regex"));

/// Replace every known corrupted sequence with its accented equivalent
pub fn repair_encoding(text: &str) -> String {
    let mut repaired = text.to_string();
    for (corrupted, correct) in CORRUPTION_TABLE {
        if repaired.contains(corrupted) {
            repaired = repaired.replace(corrupted, correct);
        }
    }
    repaired
}

/// Decompose and drop combining marks (`"GESTÃO"` → `"GESTAO"`)
pub fn strip_diacritics(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Collapse whitespace runs to one space and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Narrative cleanup: spreadsheet line breaks become spaces, whitespace
/// around delimiters and in general is collapsed. Blank → [`NOT_INFORMED`].
pub fn clean_narrative(text: &str) -> String {
    let text = text
        .replace("_x000D_", " ")
        .replace(['\n', '\r'], " ");
    let text = STAR_SPACING.replace_all(&text, " * ");
    let text = collapse_whitespace(&text);
    if text.is_empty() {
        NOT_INFORMED.to_string()
    } else {
        text
    }
}

/// Drop every character outside word chars, whitespace and `, . / - | *`.
/// Blank → [`NOT_INFORMED`].
pub fn strip_disallowed(text: &str) -> String {
    let text = DISALLOWED_CHARS.replace_all(text, "");
    let text = collapse_whitespace(&text);
    if text.is_empty() {
        NOT_INFORMED.to_string()
    } else {
        text
    }
}

/// Remove control characters and collapse whitespace of a display cell
pub fn clean_cell(text: &str) -> String {
    collapse_whitespace(&CONTROL_CHARS.replace_all(text, ""))
}

/// Lowercase, diacritic-free rendering for substring comparisons
///
/// repair → line-break cleanup → strip diacritics → lowercase → drop
/// disallowed characters → collapse whitespace. Blank input stays blank.
/// Idempotent.
pub fn canonicalize_comparison_form(text: &str) -> String {
    let text = repair_encoding(text)
        .replace("_x000D_", " ")
        .replace(['\n', '\r'], " ");
    let text = strip_diacritics(&text).to_lowercase();
    let text = DISALLOWED_CHARS.replace_all(&text, "");
    let text = STAR_SPACING.replace_all(&text, " * ");
    collapse_whitespace(&text)
}

/// Rebuild a key as `"* seg1 * seg2 * ... *"` from its non-empty trimmed
/// segments. Text without any segment is returned unchanged. Idempotent.
pub fn canonicalize_key(key: &str) -> String {
    let segments = split_segments(key);
    if segments.is_empty() {
        return key.to_string();
    }
    format!("* {} *", segments.join(" * "))
}

/// Non-empty trimmed segments of a delimiter-joined key or narrative
pub fn split_segments(text: &str) -> Vec<&str> {
    text.split(KEY_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Delimiter-normalized rendering: `*` becomes `|`, pipes enforced at both
/// ends, whitespace collapsed (`"* A * B *"` → `"| A | B |"`)
pub fn to_pipe_form(text: &str) -> String {
    let mut piped = collapse_whitespace(&text.replace(KEY_DELIMITER, "|"));
    if !piped.starts_with('|') {
        piped.insert_str(0, "| ");
    }
    if !piped.ends_with('|') {
        piped.push_str(" |");
    }
    collapse_whitespace(&piped)
}

/// Inverse of [`to_pipe_form`], back to the canonical key form
pub fn from_pipe_form(piped: &str) -> String {
    canonicalize_key(&piped.replace('|', "*"))
}

/// Wrap a narrative in delimiter markers with single spaces around every
/// delimiter, after corruption repair
pub fn bracket_narrative(narrative: &str) -> String {
    let text = narrative.trim().replace(KEY_DELIMITER, " * ");
    let text = STAR_SPACING.replace_all(&text, " * ");
    let mut text = repair_encoding(&collapse_whitespace(&text));
    if !text.starts_with(KEY_DELIMITER) {
        text.insert_str(0, "* ");
    }
    if !text.ends_with(KEY_DELIMITER) {
        text.push_str(" *");
    }
    STAR_ANY_SPACING.replace_all(&text, " * ").trim().to_string()
}

/// True for the values the cascade passes through without canonicalizing
pub fn is_sentinel(value: &str) -> bool {
    matches!(value.trim(), NOT_INFORMED | NOT_IDENTIFIED | IGNORED_LABEL)
}

/// Snake-case ASCII field name (`"Nº EMP"` → `"no_emp"`,
/// `"Data/Hora de Cadastro da LIQ"` → `"data_hora_de_cadastro_da_liq"`)
pub fn normalize_field_name(name: &str) -> String {
    let repaired = repair_encoding(name).replace('º', "o").replace('ª', "a");
    let ascii = strip_diacritics(&repaired);
    NON_ALNUM_RUN
        .replace_all(&ascii, "_")
        .trim_matches('_')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_curated_token() {
        assert_eq!(repair_encoding("P_GESTÇŸO_ESCOLAR"), "P_GESTÃO_ESCOLAR");
        assert_eq!(repair_encoding("E_ENSINO_MÇ%DIO"), "E_ENSINO_MÉDIO");
        assert_eq!(repair_encoding("INFRAESTUTURA"), "INFRAESTRUTURA");
    }

    #[test]
    fn test_repair_generic_sequences() {
        assert_eq!(repair_encoding("GESTÇŸO_ESCOLAR"), "GESTÃO_ESCOLAR");
        assert_eq!(repair_encoding("ALFABETIZAÇÎÇŸO"), "ALFABETIZAÇÃO");
        assert_eq!(repair_encoding("SituaÇõÇœo"), "Situação");
        assert_eq!(repair_encoding("N¶§ EMP"), "Nº EMP");
        assert_eq!(repair_encoding("texto limpo"), "texto limpo");
    }

    #[test]
    fn test_strip_diacritics() {
        assert_eq!(strip_diacritics("GESTÃO EDUCAÇÃO Médio"), "GESTAO EDUCACAO Medio");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \t b\n\nc  "), "a b c");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn test_clean_narrative() {
        assert_eq!(
            clean_narrative("EDUCACAO_x000D_\n*   ENSINO  MEDIO\r"),
            "EDUCACAO * ENSINO MEDIO"
        );
        assert_eq!(clean_narrative("  \r\n "), NOT_INFORMED);
    }

    #[test]
    fn test_strip_disallowed() {
        assert_eq!(strip_disallowed("R$ 100,00 (bolsa)"), "R 100,00 bolsa");
        assert_eq!(strip_disallowed("a|b*c-d/e.f"), "a|b*c-d/e.f");
        assert_eq!(strip_disallowed("$$$"), NOT_INFORMED);
    }

    #[test]
    fn test_clean_cell() {
        assert_eq!(clean_cell("abc\u{0007}  def\u{007f}"), "abc def");
    }

    #[test]
    fn test_comparison_form() {
        assert_eq!(
            canonicalize_comparison_form("  GESTÇŸO   Escolar\r\n(2024)"),
            "gestao escolar 2024"
        );
        assert_eq!(canonicalize_comparison_form("   "), "");
    }

    #[test]
    fn test_comparison_form_idempotent() {
        let inputs = [
            "* EDUCAÇÃO * ENSINO MÉDIO * GESTÃO ESCOLAR *",
            "GESTÇŸO_INOVAÇÎÇŸO   e   CURRÇ¸CULO",
            "Bolsa  de  estudo_x000D_ R$ 1.234,56",
            "ﬁnanças | ℌistórico",
            "",
        ];
        for input in inputs {
            let once = canonicalize_comparison_form(input);
            assert_eq!(canonicalize_comparison_form(&once), once, "input: {input}");
        }
    }

    #[test]
    fn test_canonicalize_key() {
        assert_eq!(canonicalize_key("A*B* *C"), "* A * B * C *");
        assert_eq!(canonicalize_key("*  A  *B*"), "* A * B *");
        assert_eq!(canonicalize_key(" * "), " * ");
        assert_eq!(canonicalize_key(""), "");
    }

    #[test]
    fn test_canonicalize_key_idempotent() {
        for input in ["A*B*C", "* X * Y *", "  lone  ", "**"] {
            let once = canonicalize_key(input);
            assert_eq!(canonicalize_key(&once), once);
        }
    }

    #[test]
    fn test_pipe_form_round_trip() {
        assert_eq!(to_pipe_form("* A * B *"), "| A | B |");
        assert_eq!(to_pipe_form("A * B"), "| A | B |");
        assert_eq!(from_pipe_form("| A | B |"), "* A * B *");
    }

    #[test]
    fn test_bracket_narrative() {
        assert_eq!(
            bracket_narrative("EDUCACAO*ENSINO MEDIO  *GESTAO ESCOLAR"),
            "* EDUCACAO * ENSINO MEDIO * GESTAO ESCOLAR *"
        );
        assert_eq!(bracket_narrative("  * A * B *  "), "* A * B *");
        assert_eq!(bracket_narrative("P_GESTÇŸO_X"), "* P_GESTÃO_X *");
    }

    #[test]
    fn test_is_sentinel() {
        assert!(is_sentinel(NOT_INFORMED));
        assert!(is_sentinel(" NÃO IDENTIFICADO "));
        assert!(is_sentinel("IGNORADO"));
        assert!(!is_sentinel("#"));
        assert!(!is_sentinel("* A *"));
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("Nº EMP"), "no_emp");
        assert_eq!(normalize_field_name("N¶§ EMP"), "no_emp");
        assert_eq!(normalize_field_name("ExercÇðcio"), "exercicio");
        assert_eq!(normalize_field_name("Valor EMP-Devolução GCV"), "valor_emp_devolucao_gcv");
        assert_eq!(
            normalize_field_name("Data/Hora de Cadastro da LIQ"),
            "data_hora_de_cadastro_da_liq"
        );
        assert_eq!(normalize_field_name(" Cat.Econ "), "cat_econ");
    }
}
