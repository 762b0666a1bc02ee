//! Helpers for device-side (always `/`-separated) paths.
//!
//! Device paths are plain strings: they never touch the host file system, so
//! `std::path` semantics (drive letters, `\` separators) must not apply.

/// Join a parent path and a child name with exactly one separator.
pub fn concat(parent: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if parent.is_empty() {
        return name.to_string();
    }
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent directory of a path. The parent of a top-level entry is `/`.
pub fn parent(path: &str) -> &str {
    let trimmed = trim_trailing(path);
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(index) => &trimmed[..index],
        None => "",
    }
}

/// Last segment of a path. The name of `/` is `/`.
pub fn file_name(path: &str) -> &str {
    let trimmed = trim_trailing(path);
    if trimmed == "/" {
        return trimmed;
    }
    match trimmed.rfind('/') {
        Some(index) => &trimmed[index + 1..],
        None => trimmed,
    }
}

/// Remove trailing separators, keeping a lone `/`.
pub fn trim_trailing(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Path of `path` relative to `ancestor`, or `None` when it is not below it.
///
/// Equal paths yield `Some("")`.
pub fn relative<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    let path = trim_trailing(path);
    let ancestor = trim_trailing(ancestor);

    if path == ancestor {
        return Some("");
    }
    if ancestor == "/" {
        return path.strip_prefix('/');
    }
    path.strip_prefix(ancestor)?.strip_prefix('/')
}

/// Whether `path` is strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    relative(path, ancestor).is_some_and(|rel| !rel.is_empty())
}

/// Collapse the doubled separators that shell quoting leaves in messages.
pub fn collapse_separators(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut previous_slash = false;
    for c in text.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        result.push(c);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent() {
        assert_eq!(parent("/sdcard/a"), "/sdcard");
        assert_eq!(parent("/sdcard"), "/");
        assert_eq!(parent("/sdcard/DCIM/"), "/sdcard");
        assert_eq!(parent("file"), "");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/sdcard/ASUS/root-checker.apk"), "root-checker.apk");
        assert_eq!(file_name("/sdcard/ASUS/"), "ASUS");
        assert_eq!(file_name("/sdcard/"), "sdcard");
        assert_eq!(file_name("/"), "/");
        assert_eq!(file_name("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_concat() {
        assert_eq!(concat("/sdcard", "a"), "/sdcard/a");
        assert_eq!(concat("/sdcard/", "a"), "/sdcard/a");
        assert_eq!(concat("/", "sdcard"), "/sdcard");
    }

    #[test]
    fn test_relative() {
        assert_eq!(
            relative("/sdcard/DCIM/New Folder 1/New File.txt", "/sdcard/DCIM/"),
            Some("New Folder 1/New File.txt")
        );
        assert_eq!(relative("/sdcard/DCIM", "/sdcard/DCIM"), Some(""));
        assert_eq!(relative("/sdcard/DCIMX/a", "/sdcard/DCIM"), None);
        assert_eq!(relative("/sdcard", "/"), Some("sdcard"));
    }

    #[test]
    fn test_collapse_separators() {
        assert_eq!(
            collapse_separators("rm: //sdcard//a: Permission denied"),
            "rm: /sdcard/a: Permission denied"
        );
    }
}
