//! Escaping of arguments sent to the device shell.

const SHELL_METACHARACTERS: &[char] = &[
    '(', ')', '<', '>', '|', ';', '&', '*', '\\', '~', '"', '\'', ' ', '$', '`',
];

/// Prefix every shell metacharacter in `arg` with a backslash.
pub fn escape_shell(arg: &str) -> String {
    let mut escaped = String::with_capacity(arg.len() + 8);
    for c in arg.chars() {
        if SHELL_METACHARACTERS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
