//! "Did you mean" suggestions for unknown asset commands

/// Most suggestions returned
pub const MAX_SUGGESTIONS: usize = 5;

/// Commands similar to `query`, closest first
///
/// A command qualifies when either name contains the other
/// (case-insensitively) or it is within two edits of `query`. Candidates
/// are ordered by Levenshtein distance, then by name.
///
/// # Example
///
/// ```rust
/// use zen::task::suggest::suggest;
///
/// let commands = ["feature-spec", "user-story", "spec-review"];
/// assert_eq!(suggest("spec", commands), vec!["spec-review", "feature-spec"]);
/// ```
pub fn suggest<I, S>(query: &str, commands: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, String)> = commands
        .into_iter()
        .filter_map(|command| {
            let command = command.as_ref();
            let candidate = command.to_lowercase();
            let distance = levenshtein(&needle, &candidate);
            let related = candidate.contains(&needle) || needle.contains(&candidate) || distance <= 2;
            related.then(|| (distance, command.to_string()))
        })
        .collect();

    scored.sort();
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, command)| command)
        .collect()
}

/// Edit distance between `a` and `b`, counted in chars
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
