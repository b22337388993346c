pub const MAX_NAME_LENGTH: usize = 256;

/// Normalise a display name: drop control characters, collapse runs of
/// whitespace, trim, cap at [`MAX_NAME_LENGTH`] characters.
pub fn clean_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_NAME_LENGTH)
        .collect()
}
