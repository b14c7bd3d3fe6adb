//! POSIX shell quoting for interpolated paths and payloads.

/// Quote `value` for a POSIX shell.
///
/// Plain words made of safe characters pass through unchanged; everything
/// else is wrapped in single quotes with embedded quotes spelled `'\''`.
pub fn quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `cd <dir> && <command>`.
pub fn in_dir(dir: &str, command: &str) -> String {
    format!("cd {} && {command}", quote(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain/path.rs", "plain/path.rs")]
    #[case("", "''")]
    #[case("with space", "'with space'")]
    #[case("it's", r"'it'\''s'")]
    #[case("$(rm -rf /)", "'$(rm -rf /)'")]
    fn quoting(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(quote(input), expected);
    }

    #[test]
    fn in_dir_quotes_directory() {
        assert_eq!(in_dir("/tmp/a b", "ls"), "cd '/tmp/a b' && ls");
    }
}
