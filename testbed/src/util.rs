//! Utility functions for the test harness.

use crate::error::LaunchError;
use anyhow::Result;

/// Returns a token unique to this process, for naming per-run fixtures such as
/// temporary data stores that concurrent runs must not share.
pub fn testing_token() -> String {
    format!("_test{}", std::process::id())
}

/// Quotes a command line for display, failing on arguments that cannot be passed to
/// a child process.
pub fn quote_command(argv: &[String]) -> Result<String, LaunchError> {
    shlex::try_join(argv.iter().map(String::as_str))
        .map_err(|_| LaunchError::UnsupportedArguments(argv.to_vec()))
}

/// Writes a diff between two strings to a writer.
pub fn write_diff(
    writer: &mut impl std::io::Write,
    indent: usize,
    left: &str,
    right: &str,
) -> Result<()> {
    use colored::Colorize;

    let indent_str = " ".repeat(indent);

    let diff = diff::lines(left, right);
    for d in diff {
        let formatted = match d {
            diff::Result::Left(l) => std::format!("{indent_str}- {l}").red(),
            diff::Result::Both(l, _) => std::format!("{indent_str}  {l}").bright_black(),
            diff::Result::Right(r) => std::format!("{indent_str}+ {r}").green(),
        };

        writeln!(writer, "{formatted}")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_testing_token_names_process() {
        let token = testing_token();
        assert_eq!(token, format!("_test{}", std::process::id()));
        assert_eq!(token, testing_token());
    }

    #[test]
    fn test_quote_command() -> anyhow::Result<()> {
        let argv = vec![String::from("echo"), String::from("two words")];
        assert_eq!(quote_command(&argv)?, "echo 'two words'");

        let bad = vec![String::from("echo"), String::from("nul\0byte")];
        assert!(matches!(
            quote_command(&bad),
            Err(LaunchError::UnsupportedArguments(_))
        ));

        Ok(())
    }

    #[test]
    fn test_write_diff_marks_changed_lines() -> anyhow::Result<()> {
        colored::control::set_override(false);

        let mut buf = vec![];
        write_diff(&mut buf, 2, "same\nold", "same\nnew")?;
        let text = String::from_utf8(buf)?;

        assert_eq!(text, "    same\n  - old\n  + new\n");

        Ok(())
    }
}
