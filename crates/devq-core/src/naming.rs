//! Duplicate-name resolution for copy, move and rename targets.

use std::collections::BTreeSet;

use regex::Regex;

/// Split a file name into its stem and extension (with the leading dot).
///
/// Names starting with a dot have no extension, and `.tar.<x>` is treated as
/// a single extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let Some(last_dot) = name.rfind('.').filter(|&i| i >= 1) else {
        return (name, "");
    };

    if let Some(second_last) = name[..last_dot].rfind('.')
        && second_last > 0
        && &name[second_last + 1..last_dot] == "tar"
    {
        return name.split_at(second_last);
    }

    name.split_at(last_dot)
}

/// Pick the suffix that fills the first unused duplicate index.
///
/// `suffixes` are the captured counters of sibling names that match the
/// candidate (empty for an exact or bare-suffix match). Returns an empty
/// string when the candidate is free.
pub fn existing_indexes<I, S>(suffixes: I, copy_suffix: &str) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut indexes = BTreeSet::new();
    for suffix in suffixes {
        let suffix = suffix.as_ref();
        if suffix.is_empty() {
            indexes.insert(0u64);
        } else if let Ok(index) = suffix.parse::<u64>() {
            indexes.insert(index);
        }
    }

    if indexes.first() != Some(&0) {
        return String::new();
    }

    let next = indexes
        .iter()
        .enumerate()
        .find(|&(position, &index)| index > position as u64)
        .map_or(indexes.len(), |(position, _)| position);

    format!("{copy_suffix} {next}")
}

/// Resolve a non-conflicting name for `name` among `existing` siblings.
///
/// `copy_suffix` is inserted before the counter for copy-type operations and
/// is empty for plain moves and renames.
pub fn duplicate_name<I, S>(existing: I, name: &str, copy_suffix: &str) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let (stem, extension) = split_extension(name);
    let pattern = format!(
        r"^{}(?:{}(?: (?<iter>\d+))?)?{}$",
        regex::escape(stem),
        regex::escape(copy_suffix),
        regex::escape(extension),
    );

    // Every part of the pattern is escaped, so compilation cannot fail.
    let Ok(re) = Regex::new(&pattern) else {
        return name.to_string();
    };

    let suffixes: Vec<String> = existing
        .into_iter()
        .filter_map(|sibling| {
            re.captures(sibling.as_ref()).map(|caps| {
                caps.name("iter")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            })
        })
        .collect();

    format!(
        "{stem}{}{extension}",
        existing_indexes(&suffixes, copy_suffix)
    )
}
