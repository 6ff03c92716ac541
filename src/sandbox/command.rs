//! Running a user's command in the sandbox

use std::borrow::Cow;

use tracing::debug;

use crate::remote::{RemoteChannel, Result};

/// Reserved command the sandbox agent treats as a request to shut down.
pub const STOP_COMMAND: &str = "__sandcastle_stop__";

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | ':' | '-')
}

/// Quote one argument for a POSIX shell. Arguments made only of
/// `[A-Za-z0-9._/:-]` pass through untouched; everything else is wrapped in
/// single quotes, with embedded single quotes written as `'\''`.
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && arg.chars().all(is_plain) {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', "'\\''")))
    }
}

pub fn shell_join<'a>(args: impl IntoIterator<Item = &'a str>) -> String {
    args.into_iter()
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `args` as one remote shell command and return its exit code as-is.
pub fn execute(channel: &mut dyn RemoteChannel, args: &[String]) -> Result<i32> {
    let command = shell_join(args.iter().map(String::as_str));
    debug!("Executing in sandbox: {}", command);
    channel.exec(&command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;

    #[test]
    fn test_plain_arguments_are_not_quoted() {
        assert_eq!(shell_quote("echo"), "echo");
        assert_eq!(shell_quote("src/main.rs"), "src/main.rs");
        assert_eq!(shell_quote("--flag=x"), "'--flag=x'");
        assert_eq!(shell_quote("host:8080"), "host:8080");
        assert_eq!(shell_quote("a_b-c.d"), "a_b-c.d");
    }

    #[test]
    fn test_space_is_quoted() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
    }

    #[test]
    fn test_single_quote_is_escaped() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_shell_metacharacters_are_quoted() {
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
        assert_eq!(shell_quote("a;b"), "'a;b'");
        assert_eq!(shell_quote("*.rs"), "'*.rs'");
        assert_eq!(shell_quote("tab\there"), "'tab\there'");
    }

    #[test]
    fn test_empty_argument_is_preserved() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_non_ascii_is_quoted() {
        assert_eq!(shell_quote("café"), "'café'");
    }

    #[test]
    fn test_join() {
        assert_eq!(shell_join(["echo", "hello"]), "echo hello");
        assert_eq!(
            shell_join(["sh", "-c", "echo 'hi' && exit 3"]),
            "sh -c 'echo '\\''hi'\\'' && exit 3'"
        );
        assert_eq!(shell_join(std::iter::empty()), "");
    }

    #[test]
    fn test_execute_returns_exit_code_verbatim() {
        let remote = FakeConnector::new();
        remote.respond("exit 3", 3, "");

        let args = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let code = execute(&mut remote.channel(), &args).unwrap();

        assert_eq!(code, 3);
        assert_eq!(remote.commands(), vec!["sh -c 'exit 3'"]);
    }
}
