//! Template tokenizer.
//!
//! Splits a string into literal text, `${name}` substitutions and `#{expr}`
//! expressions. `$${` and `##{` produce the marker literally.

use super::parser::{self, Expr};
use super::ExpressionError;

/// One piece of a template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateToken {
    Literal(String),
    /// `${name}`: direct lookup of a bound name.
    Substitution(String),
    /// `#{expr}`: evaluated expression, with its source kept for messages.
    Expression { source: String, expr: Expr },
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<TemplateToken>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find(|c: char| c == '$' || c == '#') {
        let marker = rest.as_bytes()[pos] as char;
        let after = &rest[pos + 1..];

        // Doubled marker before a brace is an escape.
        if after.starts_with(marker) && after[1..].starts_with('{') {
            literal.push_str(&rest[..pos]);
            literal.push(marker);
            literal.push('{');
            rest = &after[2..];
            continue;
        }

        if !after.starts_with('{') {
            literal.push_str(&rest[..=pos]);
            rest = after;
            continue;
        }

        literal.push_str(&rest[..pos]);
        let body_start = &after[1..];
        let end = closing_brace(body_start)
            .ok_or_else(|| ExpressionError::Unterminated { template: text.to_string() })?;
        let body = &body_start[..end];

        if !literal.is_empty() {
            tokens.push(TemplateToken::Literal(std::mem::take(&mut literal)));
        }
        if marker == '$' {
            tokens.push(TemplateToken::Substitution(body.trim().to_string()));
        } else {
            tokens.push(TemplateToken::Expression {
                source: body.to_string(),
                expr: parser::parse(body)?,
            });
        }
        rest = &body_start[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        tokens.push(TemplateToken::Literal(literal));
    }
    Ok(tokens)
}

/// Byte offset of the `}` closing a marker body, honouring nested braces and
/// quoted strings.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(tokenize("hello").unwrap(), vec![TemplateToken::Literal("hello".into())]);
        assert!(tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_mixed_tokens() {
        let tokens = tokenize(r#"#{3 - int({"prime": "7"}[prime])}-${q}"#).unwrap();
        assert_eq!(tokens.len(), 3);
        match &tokens[0] {
            TemplateToken::Expression { source, .. } => {
                assert_eq!(source, r#"3 - int({"prime": "7"}[prime])"#)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tokens[1], TemplateToken::Literal("-".into()));
        assert_eq!(tokens[2], TemplateToken::Substitution("q".into()));
    }

    #[test]
    fn test_brace_inside_string() {
        let tokens = tokenize("#{'}' + x}").unwrap();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_escapes_and_lone_markers() {
        let tokens = tokenize("cost $5 #1 $${not} ##{nor}").unwrap();
        assert_eq!(tokens, vec![TemplateToken::Literal("cost $5 #1 ${not} #{nor}".into())]);
    }

    #[test]
    fn test_unterminated() {
        assert!(matches!(tokenize("${oops"), Err(ExpressionError::Unterminated { .. })));
        assert!(matches!(tokenize("#{1 + }"), Err(ExpressionError::Syntax { .. })));
    }
}
