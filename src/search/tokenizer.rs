//! Query and document tokenization for keyword scoring.
//!
//! Tokens are lower-cased runs of alphanumeric characters; everything else
//! separates tokens. There is no stemming or stop-word removal beyond the
//! optional plural folding.

/// Tokenizer shared by corpus snapshots and queries.
///
/// The same instance must tokenize both sides, otherwise folded document
/// terms and unfolded query terms would never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tokenizer {
    fold_plurals: bool,
}

impl Tokenizer {
    pub fn new(fold_plurals: bool) -> Self {
        Self { fold_plurals }
    }

    pub fn folds_plurals(&self) -> bool {
        self.fold_plurals
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| {
                let lower = s.to_lowercase();
                if self.fold_plurals {
                    fold_plural(lower)
                } else {
                    lower
                }
            })
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Strip a trailing `s` from tokens longer than three characters that do
/// not end in `ss`.
fn fold_plural(mut token: String) -> String {
    if token.chars().count() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token.pop();
    }
    token
}
