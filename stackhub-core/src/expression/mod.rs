//! Template and expression language.
//!
//! Parameter values and output templates may embed `${name}` substitutions and
//! `#{expression}` evaluations. [`Template`] is the single entry point: parse
//! once, inspect [`Template::references`], then [`Template::render`] against a
//! set of string bindings.

mod eval;
pub mod parser;
mod template;
pub mod value;

pub use template::TemplateToken;
pub use value::Value;

use std::collections::BTreeMap;
use thiserror::Error;

/// Name to value bindings visible to a template.
pub type Bindings = BTreeMap<String, String>;

/// What to do with names that have no binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Unbound names are an error.
    #[default]
    Strict,
    /// Unbound names expand to `<name>`. For debugging manifests.
    AutoResolve,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("syntax error in '{expression}' at offset {position}")]
    Syntax { expression: String, position: usize },

    #[error("unterminated marker in '{template}'")]
    Unterminated { template: String },

    #[error("unresolved name '{name}'")]
    Unresolved { name: String },

    #[error("{reason}")]
    Type { reason: String },

    #[error("{reason}")]
    Index { reason: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{name}(): {reason}")]
    Function { name: String, reason: String },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    tokens: Vec<TemplateToken>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        Ok(Self { tokens: template::tokenize(text)? })
    }

    pub fn tokens(&self) -> &[TemplateToken] {
        &self.tokens
    }

    /// True if the template has no markers.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, TemplateToken::Literal(_)))
    }

    /// Names the template needs bound, in first-use order.
    pub fn references(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for token in &self.tokens {
            let names = match token {
                TemplateToken::Literal(_) => continue,
                TemplateToken::Substitution(name) => vec![name.clone()],
                TemplateToken::Expression { expr, .. } => expr.identifiers(),
            };
            for name in names {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// Render to a string.
    pub fn render(
        &self,
        bindings: &Bindings,
        mode: ResolveMode,
    ) -> Result<String, ExpressionError> {
        let evaluator = eval::Evaluator::new(bindings, mode);
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                TemplateToken::Literal(text) => out.push_str(text),
                TemplateToken::Substitution(name) => {
                    out.push_str(&evaluator.lookup(name)?.to_string())
                }
                TemplateToken::Expression { expr, .. } => {
                    out.push_str(&evaluator.eval(expr)?.to_string())
                }
            }
        }
        Ok(out)
    }

    /// Render keeping the value type when the template is exactly one
    /// expression, so `#{1 + 1}` yields an int rather than `"2"`.
    pub fn render_value(
        &self,
        bindings: &Bindings,
        mode: ResolveMode,
    ) -> Result<Value, ExpressionError> {
        match self.tokens.as_slice() {
            [TemplateToken::Expression { expr, .. }] => {
                eval::Evaluator::new(bindings, mode).eval(expr)
            }
            _ => self.render(bindings, mode).map(Value::String),
        }
    }
}

/// Parse and render `text` in one step.
pub fn render(
    text: &str,
    bindings: &Bindings,
    mode: ResolveMode,
) -> Result<String, ExpressionError> {
    Template::parse(text)?.render(bindings, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_prime_example() {
        let b = bindings(&[("prime", "prime"), ("q", "x")]);
        let out =
            render(r#"#{3 - int({"prime": "7"}[prime])}-${q}"#, &b, ResolveMode::Strict).unwrap();
        assert_eq!(out, "-4-x");
    }

    #[test]
    fn test_references() {
        let t = Template::parse("${a}-#{b + c.d}-${a}").unwrap();
        assert_eq!(t.references(), vec!["a", "b", "c.d"]);
        assert!(!t.is_literal());
        assert!(Template::parse("plain").unwrap().is_literal());
    }

    #[test]
    fn test_unresolved_strict_and_auto() {
        let b = Bindings::new();
        let err = render("${missing}", &b, ResolveMode::Strict).unwrap_err();
        assert_eq!(err, ExpressionError::Unresolved { name: "missing".into() });

        let out = render("${missing}/#{other}", &b, ResolveMode::AutoResolve).unwrap();
        assert_eq!(out, "<missing>/<other>");
    }

    #[test]
    fn test_functions_and_methods() {
        let b = bindings(&[("dns.domain", "Example.COM"), ("count", "3"), ("env", "prod")]);
        let cases = [
            ("#{dns.domain.lowerAscii()}", "example.com"),
            ("#{int(count) * 2}", "6"),
            ("#{size(dns.domain)}", "11"),
            ("#{env == 'prod' ? 'large' : 'small'}", "large"),
            ("#{env in ['dev', 'prod']}", "true"),
            ("#{'a,b,c'.split(',').join('-')}", "a-b-c"),
            ("#{dns.domain.matches('^[A-Za-z]+\\\\.COM$')}", "true"),
            ("#{[1, 2] + [3]}", "[1,2,3]"),
            ("#{double(count) / 2.0}", "1.5"),
            ("#{string(7) + 'x'}", "7x"),
            ("#{!(1 > 2) && 'ab'.startsWith('a')}", "true"),
        ];
        for (template, expected) in cases {
            let out = render(template, &b, ResolveMode::Strict).unwrap();
            assert_eq!(out, expected, "{}", template);
        }
    }

    #[test]
    fn test_render_value_keeps_type() {
        let b = Bindings::new();
        let t = Template::parse("#{1 + 1}").unwrap();
        assert_eq!(t.render_value(&b, ResolveMode::Strict).unwrap(), Value::Int(2));
        let t = Template::parse("n=#{1 + 1}").unwrap();
        assert_eq!(t.render_value(&b, ResolveMode::Strict).unwrap(), Value::String("n=2".into()));
    }

    #[test]
    fn test_evaluation_errors() {
        let b = Bindings::new();
        let strict = |text: &str| render(text, &b, ResolveMode::Strict);
        assert_eq!(strict("#{1 / 0}").unwrap_err(), ExpressionError::DivisionByZero);
        assert!(matches!(strict("#{int('x')}"), Err(ExpressionError::Function { .. })));
        assert!(matches!(strict("#{{'a': 1}['b']}"), Err(ExpressionError::Index { .. })));
        assert!(matches!(strict("#{1 + 'a'}"), Err(ExpressionError::Type { .. })));
        assert!(matches!(strict("#{nope(1)}"), Err(ExpressionError::Function { .. })));
    }
}
