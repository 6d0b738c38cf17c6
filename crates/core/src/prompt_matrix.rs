//! Prompt matrix expansion.
//!
//! A prompt may contain alternative groups such as `a {red|blue} vase`.
//! [`expand`] produces the cartesian product of every group, left to
//! right, with earlier groups varying slowest.

use std::sync::LazyLock;

use regex::Regex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Separator placed between the positive and negative halves of a prompt.
pub const NEGATIVE_SEPARATOR: &str = " ### ";

/// Regex pattern matching one non-greedy `{...}` alternative group.
pub const MATRIX_GROUP_PATTERN: &str = r"\{(.*?)\}";

static MATRIX_GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MATRIX_GROUP_PATTERN).expect("valid regex"));

/// Character separating the options inside a group.
const OPTION_SEPARATOR: char = '|';

// ---------------------------------------------------------------------------
// Prompt assembly
// ---------------------------------------------------------------------------

/// Join a positive and negative prompt into the single string the service
/// expects. The separator is omitted when the negative prompt is empty.
pub fn full_prompt(prompt: &str, negative_prompt: &str) -> String {
    if negative_prompt.is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt}{NEGATIVE_SEPARATOR}{negative_prompt}")
    }
}

/// Split a full prompt back into its positive and negative halves.
pub fn split_prompt(full: &str) -> (&str, &str) {
    match full.split_once(NEGATIVE_SEPARATOR) {
        Some((positive, negative)) => (positive, negative),
        None => (full, ""),
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Return the literal text of every alternative group, in order of
/// appearance (braces included).
pub fn matrix_groups(prompt: &str) -> Vec<&str> {
    MATRIX_GROUP_RE
        .find_iter(prompt)
        .map(|m| m.as_str())
        .collect()
}

/// Expand every `{a|b|...}` group into the full list of concrete prompts.
///
/// Each group substitutes into the first remaining occurrence of its
/// literal text, so repeated identical groups expand independently.
/// `{}` yields a single empty option and `{x}` a single `x` option.
pub fn expand(prompt: &str) -> Vec<String> {
    let groups = matrix_groups(prompt);
    if groups.is_empty() {
        return vec![prompt.to_string()];
    }

    let mut prompts = vec![prompt.to_string()];
    for group in groups {
        let inner = &group[1..group.len() - 1];
        let options: Vec<&str> = inner.split(OPTION_SEPARATOR).collect();
        prompts = prompts
            .iter()
            .flat_map(|previous| {
                options
                    .iter()
                    .map(move |option| previous.replacen(group, option, 1))
            })
            .collect();
    }
    prompts
}

/// Number of prompts [`expand`] would produce, without building them.
pub fn expansion_count(prompt: &str) -> usize {
    matrix_groups(prompt)
        .iter()
        .map(|group| group[1..group.len() - 1].split(OPTION_SEPARATOR).count())
        .product()
}
