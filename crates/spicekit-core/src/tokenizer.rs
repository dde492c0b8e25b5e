//! Quote-aware tokenizer for SPICE lines
//!
//! Whitespace separates tokens except inside `(...)`, `{...}`, `[...]`,
//! QSPICE `«...»` node groups, `'...'` and `"..."`. Tokens around `=` and `,`
//! are glued back together so that `R = 10k` and `tc=1, 2` come out as single
//! `key=value` tokens.

/// Merge `+` continuation lines into one logical line.
pub fn join_continuations(text: &str) -> String {
    let mut logical = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        if i == 0 {
            logical.push_str(line);
            continue;
        }
        let trimmed = line.trim_start();
        let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
        logical.push(' ');
        logical.push_str(body.trim_start());
    }
    logical
}

/// Split off a trailing `;` comment that sits outside quotes and brackets.
///
/// The comment keeps its leading `;`.
pub fn split_comment(line: &str) -> (&str, Option<&str>) {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '{' | '[' | '«' => depth += 1,
            ')' | '}' | ']' | '»' => depth = (depth - 1).max(0),
            ';' if depth == 0 => return (line[..i].trim_end(), Some(&line[i..])),
            _ => {}
        }
    }
    (line.trim_end(), None)
}

/// Split a line (without comment) into tokens.
pub fn tokenize(code: &str) -> Vec<String> {
    let mut raw = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for c in code.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '{' | '[' | '«' => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' | ']' | '»' => {
                depth = (depth - 1).max(0);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    raw.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        raw.push(current);
    }

    glue_operators(raw)
}

fn glue_operators(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    let mut glue_next = false;
    for token in raw {
        let joins_previous = glue_next || token.starts_with('=') || token.starts_with(',');
        glue_next = token.ends_with('=') || token.ends_with(',');
        match out.last_mut() {
            Some(last) if joins_previous => last.push_str(&token),
            _ => out.push(token),
        }
    }
    out
}

/// Split a `key=value` token. The key must be an identifier.
pub fn split_param(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    let is_ident = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !key.starts_with(|c: char| c.is_ascii_digit());
    is_ident.then_some((key, value))
}

/// Whether a value is already wrapped in one of the SPICE delimiters.
fn is_delimited(value: &str) -> bool {
    let pairs = [('{', '}'), ('\'', '\''), ('"', '"'), ('(', ')')];
    value.len() >= 2
        && pairs
            .iter()
            .any(|&(open, close)| value.starts_with(open) && value.ends_with(close))
}

/// Whether whitespace appears outside any delimiter.
fn has_bare_whitespace(value: &str) -> bool {
    tokenize(value).len() > 1
}

/// Wrap a value in braces when it would otherwise split into several tokens.
pub fn quote_value(value: &str) -> String {
    let value = value.trim();
    if has_bare_whitespace(value) && !is_delimited(value) {
        format!("{{{}}}", value)
    } else {
        value.to_string()
    }
}

/// Parse a whitespace separated `k=v` list such as an LTspice `SpiceLine`.
///
/// Tokens that are not assignments are returned separately in order.
pub fn parse_assignments(text: &str) -> (Vec<(String, String)>, Vec<String>) {
    let mut pairs = Vec::new();
    let mut loose = Vec::new();
    for token in tokenize(text) {
        match split_param(&token) {
            Some((k, v)) => pairs.push((k.to_string(), v.to_string())),
            None => loose.push(token),
        }
    }
    (pairs, loose)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brackets_and_quotes() {
        let tokens = tokenize("V1 in 0 PULSE(0 1 0 1n 1n 5u 10u) Rser={a + b} name='x y'");
        assert_eq!(
            tokens,
            vec!["V1", "in", "0", "PULSE(0 1 0 1n 1n 5u 10u)", "Rser={a + b}", "name='x y'"]
        );
    }

    #[test]
    fn test_qspice_node_group() {
        assert_eq!(tokenize("Ø1 « a b ¥ » mydll x=1"), vec!["Ø1", "« a b ¥ »", "mydll", "x=1"]);
    }

    #[test]
    fn test_glue_equals_and_commas() {
        assert_eq!(tokenize("R1 a b R = 10k"), vec!["R1", "a", "b", "R=10k"]);
        assert_eq!(tokenize("R1 a b R= 10k"), vec!["R1", "a", "b", "R=10k"]);
        assert_eq!(tokenize("R1 a b tc=1, 2"), vec!["R1", "a", "b", "tc=1,2"]);
    }

    #[test]
    fn test_comment_split() {
        assert_eq!(split_comment("R1 a b 1k ; load"), ("R1 a b 1k", Some("; load")));
        assert_eq!(split_comment("B1 a 0 V={x;y}"), ("B1 a 0 V={x;y}", None));
    }

    #[test]
    fn test_continuations() {
        assert_eq!(join_continuations("X1 a b\n+ sub\r\n+  R=1"), "X1 a b sub R=1");
    }

    #[test]
    fn test_split_param() {
        assert_eq!(split_param("R=2k5R"), Some(("R", "2k5R")));
        assert_eq!(split_param("V=V(a)*2"), Some(("V", "V(a)*2")));
        assert_eq!(split_param("{a=b}"), None);
        assert_eq!(split_param("1=2"), None);
        assert_eq!(split_param("PULSE(0 1)"), None);
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value("10k"), "10k");
        assert_eq!(quote_value("a + b"), "{a + b}");
        assert_eq!(quote_value("{a + b}"), "{a + b}");
        assert_eq!(quote_value("PULSE(0 1)"), "PULSE(0 1)");
    }
}
