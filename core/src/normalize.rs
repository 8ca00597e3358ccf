use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// A title or query token folded into its canonical comparable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Word(String);

impl Word {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl AsRef<str> for Word {
    fn as_ref(&self) -> &str { &self.0 }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

// Polish diacritics, lowercase only: folding runs after lowercasing.
fn fold(c: char) -> char {
    match c {
        'ą' => 'a',
        'ć' => 'c',
        'ę' => 'e',
        'ł' => 'l',
        'ń' => 'n',
        'ó' => 'o',
        'ś' => 's',
        'ź' | 'ż' => 'z',
        other => other,
    }
}

fn fold_pass(text: &str) -> String {
    text.nfc().flat_map(char::to_lowercase).map(fold).collect()
}

/// Normalize a single token: NFC composition, lowercase, then diacritic folding.
///
/// Folding can strand a combining mark next to a bare letter (`Ł` + U+0301
/// becomes `l` + U+0301), which composes on the next pass, so passes repeat
/// until the text is stable. Every pass that changes a lowercased, folded
/// string consumes a combining mark.
pub fn normalize(token: &str) -> Word {
    let mut out = fold_pass(token);
    loop {
        let next = fold_pass(&out);
        if next == out {
            return Word(out);
        }
        out = next;
    }
}

/// Split text on whitespace, dropping empty tokens, and normalize each word.
pub fn split_words(text: &str) -> Vec<Word> {
    text.split_whitespace().map(normalize).collect()
}

/// Normalize already-split query arguments.
pub fn normalize_all<S: AsRef<str>>(words: &[S]) -> Vec<Word> {
    words
        .iter()
        .map(|w| w.as_ref())
        .filter(|w| !w.is_empty())
        .map(normalize)
        .collect()
}
