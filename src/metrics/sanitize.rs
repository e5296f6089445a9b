//! Wire-safe metric names for the exposition format

/// Lower-case `raw` and drop every character outside `[a-z0-9_:]`.
///
/// Used for service and metric names in the pull format only; trapper
/// records carry the original names.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | ':'))
        .collect()
}
