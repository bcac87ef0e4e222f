//! Single-string command lines.
//!
//! Commands are passed around as one pre-formatted argument string. On Windows
//! the string reaches the child verbatim; elsewhere it is split here using the
//! same double-quote rules, so callers quote arguments with spaces themselves.

use std::borrow::Cow;

/// Splits an argument string into individual arguments.
///
/// Whitespace separates arguments and double quotes group. Backslashes are
/// literal unless they precede a quote: `2n` backslashes and a quote yield `n`
/// backslashes and a delimiter, `2n + 1` yield `n` backslashes and a literal quote.
#[must_use]
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = arguments.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let mut backslashes = 1;
                while chars.next_if_eq(&'\\').is_some() {
                    backslashes += 1;
                }
                if chars.peek() == Some(&'"') {
                    push_backslashes(&mut current, backslashes / 2);
                    if backslashes % 2 == 1 {
                        chars.next();
                        current.push('"');
                    }
                } else {
                    push_backslashes(&mut current, backslashes);
                }
                has_token = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// Quotes a single argument so [`split_arguments`] yields it back unchanged.
#[must_use]
pub fn quote_argument(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"') {
        return Cow::Borrowed(arg);
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                push_backslashes(&mut quoted, backslashes * 2 + 1);
                quoted.push('"');
                backslashes = 0;
            }
            c => {
                push_backslashes(&mut quoted, backslashes);
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    // Doubled so the closing quote stays a delimiter.
    push_backslashes(&mut quoted, backslashes * 2);
    quoted.push('"');
    Cow::Owned(quoted)
}

fn push_backslashes(target: &mut String, count: usize) {
    target.extend(std::iter::repeat('\\').take(count));
}

/// Joins arguments into one command-line string, quoting where needed.
#[must_use]
pub fn join_arguments<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| quote_argument(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
