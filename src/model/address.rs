//! Email address parsing (RFC 5322 §3.4).

use serde::{Deserialize, Serialize};

use crate::parser::header::{decode_encoded_words, unquote};

/// A parsed email address.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `name = Some("Juan García")`, `email = "juan@ejemplo.com"`
/// - `"user@example.com"` → `name = None`, `email = "user@example.com"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The bare email address (`user@domain`).
    pub email: String,
}

impl EmailAddress {
    /// Parse an address-list header value.
    ///
    /// Strict RFC 5322 parsing is tried first (mailboxes, quoted display
    /// names, comments, groups). If that fails and the text contains `@`,
    /// the whole trimmed value becomes a single address with no name;
    /// otherwise the result is empty.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        match parse_list_strict(trimmed) {
            Some(list) => list,
            None if trimmed.contains('@') => vec![Self {
                name: None,
                email: trimmed.to_string(),
            }],
            None => Vec::new(),
        }
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Split a list on top-level commas and group delimiters, then parse every
/// mailbox. Any invalid mailbox fails the whole list.
fn parse_list_strict(raw: &str) -> Option<Vec<EmailAddress>> {
    let mut results = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut in_angle = false;
    let mut comment_depth = 0usize;
    let mut in_group = false;

    for ch in raw.chars() {
        if escaped {
            escaped = false;
            current.push(ch);
            continue;
        }
        match ch {
            '\\' if in_quotes || comment_depth > 0 => {
                escaped = true;
                current.push(ch);
            }
            '"' if comment_depth == 0 => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '(' if !in_quotes => {
                comment_depth += 1;
                current.push(ch);
            }
            ')' if !in_quotes && comment_depth > 0 => {
                comment_depth -= 1;
                current.push(ch);
            }
            _ if in_quotes || comment_depth > 0 => current.push(ch),
            '<' => {
                in_angle = true;
                current.push(ch);
            }
            '>' => {
                in_angle = false;
                current.push(ch);
            }
            ':' if !in_angle && !in_group => {
                // Group display name; the members follow.
                in_group = true;
                current.clear();
            }
            ';' if !in_angle && in_group => {
                push_mailbox(&mut results, &current)?;
                current.clear();
                in_group = false;
            }
            ',' if !in_angle => {
                push_mailbox(&mut results, &current)?;
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if in_quotes || in_angle || comment_depth > 0 || in_group {
        return None;
    }
    push_mailbox(&mut results, &current)?;
    Some(results)
}

/// Parse one list element; empty elements are skipped.
fn push_mailbox(results: &mut Vec<EmailAddress>, segment: &str) -> Option<()> {
    let (text, comments) = strip_comments(segment);
    let text = text.trim();
    if text.is_empty() {
        return Some(());
    }
    results.push(parse_mailbox(text, comments)?);
    Some(())
}

/// Parse `name <addr>`, `<addr>`, or a bare `addr`.
fn parse_mailbox(text: &str, comments: Vec<String>) -> Option<EmailAddress> {
    let (name, email) = match find_unquoted(text, '<') {
        Some(open) => {
            let close = open + text[open..].find('>')?;
            if !text[close + 1..].trim().is_empty() {
                return None;
            }
            let addr = text[open + 1..close].trim();
            // Obsolete source route: "<@relay:user@host>"
            let addr = match addr.strip_prefix('@') {
                Some(route) => route.split_once(':')?.1,
                None => addr,
            };
            let name = unquote(text[..open].trim());
            (name, addr)
        }
        None => (String::new(), text),
    };

    if !is_addr_spec(email) {
        return None;
    }

    let name = if name.is_empty() {
        comments.join(" ")
    } else {
        name
    };
    let name = decode_encoded_words(name.trim());
    Some(EmailAddress {
        name: (!name.is_empty()).then_some(name),
        email: email.to_string(),
    })
}

/// Remove `(comments)` outside quoted strings, returning the remaining text
/// and the comment contents.
fn strip_comments(segment: &str) -> (String, Vec<String>) {
    let mut text = String::with_capacity(segment.len());
    let mut comments = Vec::new();
    let mut comment = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in segment.chars() {
        if escaped {
            escaped = false;
            if depth > 0 {
                comment.push(ch);
            } else {
                text.push(ch);
            }
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                escaped = true;
                text.push(ch);
            }
            '\\' if depth > 0 => escaped = true,
            '"' if depth == 0 => {
                in_quotes = !in_quotes;
                text.push(ch);
            }
            '(' if !in_quotes => {
                if depth > 0 {
                    comment.push(ch);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let c = comment.trim();
                    if !c.is_empty() {
                        comments.push(c.to_string());
                    }
                    comment.clear();
                } else {
                    comment.push(ch);
                }
            }
            _ if depth > 0 => comment.push(ch),
            _ => text.push(ch),
        }
    }
    (text, comments)
}

/// Byte index of the first `needle` outside double quotes.
fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Check `local@domain` shape: both halves present, no whitespace or
/// structural specials outside a quoted local part.
fn is_addr_spec(addr: &str) -> bool {
    let Some((local, domain)) = addr.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    const SPECIALS: &[char] = &['<', '>', '(', ')', ',', ';', ':', '"', '\\', '@'];
    let quoted_local = local.len() >= 2 && local.starts_with('"') && local.ends_with('"');
    let local_ok = quoted_local
        || !local
            .chars()
            .any(|c| c.is_whitespace() || SPECIALS.contains(&c) || c == '[' || c == ']');
    let domain_literal = domain.starts_with('[') && domain.ends_with(']');
    let domain_ok = domain_literal
        || !domain
            .chars()
            .any(|c| c.is_whitespace() || SPECIALS.contains(&c) || c == '[' || c == ']');
    local_ok && domain_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: Option<&str>, email: &str) -> EmailAddress {
        EmailAddress {
            name: name.map(str::to_string),
            email: email.to_string(),
        }
    }

    #[test]
    fn test_parse_bare_address() {
        assert_eq!(
            EmailAddress::parse_list("user@example.com"),
            vec![addr(None, "user@example.com")]
        );
    }

    #[test]
    fn test_parse_angle_address() {
        assert_eq!(
            EmailAddress::parse_list("<user@example.com>"),
            vec![addr(None, "user@example.com")]
        );
    }

    #[test]
    fn test_parse_name_and_address() {
        assert_eq!(
            EmailAddress::parse_list("User One <user1@example.com>"),
            vec![addr(Some("User One"), "user1@example.com")]
        );
    }

    #[test]
    fn test_parse_quoted_name() {
        let list = EmailAddress::parse_list("\"Last, First\" <a@b.com>, other@c.com");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], addr(Some("Last, First"), "a@b.com"));
        assert_eq!(list[1], addr(None, "other@c.com"));
    }

    #[test]
    fn test_parse_list() {
        let list =
            EmailAddress::parse_list("User One <a@b.com>, User Two <c@d.com>, plain@addr.com");
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].name.as_deref(), Some("User Two"));
        assert_eq!(list[2].email, "plain@addr.com");
    }

    #[test]
    fn test_encoded_word_display_name() {
        let list = EmailAddress::parse_list("=?UTF-8?B?Sm9zw6kgR2FyY8OtYQ==?= <jose@example.com>");
        assert_eq!(list, vec![addr(Some("José García"), "jose@example.com")]);
    }

    #[test]
    fn test_comment_becomes_name() {
        let list = EmailAddress::parse_list("jdoe@example.com (John Doe)");
        assert_eq!(list, vec![addr(Some("John Doe"), "jdoe@example.com")]);
    }

    #[test]
    fn test_group_syntax() {
        let list = EmailAddress::parse_list("Friends: a@x.com, Bob <b@y.com>;, c@z.com");
        assert_eq!(
            list,
            vec![
                addr(None, "a@x.com"),
                addr(Some("Bob"), "b@y.com"),
                addr(None, "c@z.com")
            ]
        );
        assert!(EmailAddress::parse_list("Undisclosed recipients:;").is_empty());
    }

    #[test]
    fn test_fallback_to_bare_text_with_at() {
        assert_eq!(
            EmailAddress::parse_list("  broken <user@ "),
            vec![addr(None, "broken <user@")]
        );
        assert_eq!(EmailAddress::parse_list("user@"), vec![addr(None, "user@")]);
    }

    #[test]
    fn test_unparseable_without_at_is_empty() {
        assert!(EmailAddress::parse_list("not an address").is_empty());
        assert!(EmailAddress::parse_list("").is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            addr(Some("Alice"), "alice@example.com").to_string(),
            "Alice <alice@example.com>"
        );
        assert_eq!(addr(None, "alice@example.com").display(), "alice@example.com");
    }
}
