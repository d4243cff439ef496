//! Parser for the `#{...}` expression language.
//!
//! A small Common Expression Language subset: literals, lists, maps, dotted
//! identifiers, indexing, function and method calls, arithmetic, comparison,
//! membership, boolean logic and the conditional operator.

use super::value::Value;
use super::ExpressionError;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, none_of, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value},
    error::ParseError,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Expression syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Possibly dotted name, looked up as a whole.
    Ident(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    /// `name(args)` or `target.name(args)`.
    Call { name: String, target: Option<Box<Expr>>, args: Vec<Expr> },
}

impl Expr {
    /// Names the expression looks up, in first-use order.
    pub fn identifiers(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::List(items) => items.iter().for_each(|e| e.collect_identifiers(out)),
            Expr::Map(entries) => entries.iter().for_each(|(k, v)| {
                k.collect_identifiers(out);
                v.collect_identifiers(out);
            }),
            Expr::Unary(_, e) => e.collect_identifiers(out),
            Expr::Binary(_, l, r) | Expr::Index(l, r) => {
                l.collect_identifiers(out);
                r.collect_identifiers(out);
            }
            Expr::Conditional(c, t, e) => {
                c.collect_identifiers(out);
                t.collect_identifiers(out);
                e.collect_identifiers(out);
            }
            Expr::Call { target, args, .. } => {
                if let Some(t) = target {
                    t.collect_identifiers(out);
                }
                args.iter().for_each(|e| e.collect_identifiers(out));
            }
        }
    }
}

/// Parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    match all_consuming(ws(parse_expression))(source) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ExpressionError::Syntax {
            expression: source.to_string(),
            position: source.len() - e.input.len(),
        }),
        Err(nom::Err::Incomplete(_)) => {
            Err(ExpressionError::Syntax { expression: source.to_string(), position: source.len() })
        }
    }
}

// Whitespace wrapper
fn ws<'a, F, O, E: ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn ident_segment(input: &str) -> IResult<&str, &str> {
    recognize(pair(alt((alpha1, tag("_"))), many0(alt((alphanumeric1, tag("_"))))))(input)
}

// Identifiers may be dotted: `dns.domain`, `component.db.host`
fn parse_identifier(input: &str) -> IResult<&str, String> {
    map(recognize(pair(ident_segment, many0(pair(char('.'), ident_segment)))), String::from)(
        input,
    )
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), not(satisfy(|c: char| c.is_alphanumeric() || c == '_')))
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    map_res(
        terminated(recognize(pair(digit1, opt(pair(char('.'), digit1)))), opt(char('u'))),
        |s: &str| {
            if s.contains('.') {
                s.parse::<f64>().map(Value::Double).map_err(|_| "invalid double")
            } else {
                s.parse::<i64>().map(Value::Int).map_err(|_| "invalid int")
            }
        },
    )(input)
}

fn string_body<'a>(quote: char) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    map(
        many0(alt((
            value('"', tag("\\\"")),
            value('\'', tag("\\'")),
            value('\\', tag("\\\\")),
            value('\n', tag("\\n")),
            value('\t', tag("\\t")),
            value('\r', tag("\\r")),
            none_of(if quote == '"' { "\"\\" } else { "'\\" }),
        ))),
        |chars| chars.into_iter().collect(),
    )
}

fn parse_string_literal(input: &str) -> IResult<&str, Value> {
    map(
        alt((
            delimited(char('"'), string_body('"'), char('"')),
            delimited(char('\''), string_body('\''), char('\'')),
        )),
        Value::String,
    )(input)
}

// Raw strings: r"..." and r'...'
fn parse_raw_string(input: &str) -> IResult<&str, Value> {
    map(
        preceded(
            char('r'),
            alt((
                delimited(char('"'), take_while(|c| c != '"'), char('"')),
                delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            )),
        ),
        |s: &str| Value::String(s.to_string()),
    )(input)
}

fn parse_args(input: &str) -> IResult<&str, Vec<Expr>> {
    delimited(
        ws(char('(')),
        terminated(separated_list0(ws(char(',')), parse_expression), opt(ws(char(',')))),
        ws(char(')')),
    )(input)
}

fn parse_list(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            ws(char('[')),
            terminated(separated_list0(ws(char(',')), parse_expression), opt(ws(char(',')))),
            ws(char(']')),
        ),
        Expr::List,
    )(input)
}

fn parse_map(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            ws(char('{')),
            terminated(
                separated_list0(
                    ws(char(',')),
                    separated_pair(parse_expression, ws(char(':')), parse_expression),
                ),
                opt(ws(char(','))),
            ),
            ws(char('}')),
        ),
        Expr::Map,
    )(input)
}

// Identifier, keyword literal, or call. `a.b.f(x)` is a method call on `a.b`.
fn parse_name(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = parse_identifier(input)?;
    let (rest, args) = opt(parse_args)(rest)?;

    let expr = match (name.as_str(), args) {
        ("true", None) => Expr::Literal(Value::Bool(true)),
        ("false", None) => Expr::Literal(Value::Bool(false)),
        ("null", None) => Expr::Literal(Value::Null),
        (_, None) => Expr::Ident(name),
        (_, Some(args)) => match name.rsplit_once('.') {
            Some((target, method)) => Expr::Call {
                name: method.to_string(),
                target: Some(Box::new(Expr::Ident(target.to_string()))),
                args,
            },
            None => Expr::Call { name, target: None, args },
        },
    };
    Ok((rest, expr))
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(parse_number, Expr::Literal),
        map(parse_string_literal, Expr::Literal),
        map(parse_raw_string, Expr::Literal),
        parse_list,
        parse_map,
        parse_name,
        delimited(ws(char('(')), parse_expression, ws(char(')'))),
    )))(input)
}

enum Postfix {
    Member(String, Option<Vec<Expr>>),
    Index(Expr),
}

fn parse_postfix(input: &str) -> IResult<&str, Expr> {
    let (rest, base) = parse_primary(input)?;
    let (rest, suffixes) = many0(alt((
        map(
            preceded(ws(char('.')), pair(map(ident_segment, String::from), opt(parse_args))),
            |(name, args)| Postfix::Member(name, args),
        ),
        map(delimited(ws(char('[')), parse_expression, ws(char(']'))), Postfix::Index),
    )))(rest)?;

    let expr = suffixes.into_iter().fold(base, |acc, suffix| match suffix {
        Postfix::Member(name, Some(args)) => Expr::Call { name, target: Some(Box::new(acc)), args },
        Postfix::Member(name, None) => {
            Expr::Index(Box::new(acc), Box::new(Expr::Literal(Value::String(name))))
        }
        Postfix::Index(index) => Expr::Index(Box::new(acc), Box::new(index)),
    });
    Ok((rest, expr))
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('!')), parse_unary), |e| Expr::Unary(UnaryOp::Not, Box::new(e))),
        map(preceded(ws(char('-')), parse_unary), |e| match e {
            Expr::Literal(Value::Int(i)) => Expr::Literal(Value::Int(-i)),
            Expr::Literal(Value::Double(x)) => Expr::Literal(Value::Double(-x)),
            other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
        }),
        parse_postfix,
    ))(input)
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)))
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (rest, first) = parse_unary(input)?;
    let (rest, tail) = many0(pair(
        ws(alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
            value(BinaryOp::Mod, char('%')),
        ))),
        parse_unary,
    ))(rest)?;
    Ok((rest, fold_binary(first, tail)))
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (rest, first) = parse_multiplicative(input)?;
    let (rest, tail) = many0(pair(
        ws(alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))))),
        parse_multiplicative,
    ))(rest)?;
    Ok((rest, fold_binary(first, tail)))
}

fn parse_relation(input: &str) -> IResult<&str, Expr> {
    let (rest, first) = parse_additive(input)?;
    let (rest, tail) = many0(pair(
        ws(alt((
            value(BinaryOp::Eq, tag("==")),
            value(BinaryOp::Ne, tag("!=")),
            value(BinaryOp::Le, tag("<=")),
            value(BinaryOp::Ge, tag(">=")),
            value(BinaryOp::Lt, tag("<")),
            value(BinaryOp::Gt, tag(">")),
            value(BinaryOp::In, keyword("in")),
        ))),
        parse_additive,
    ))(rest)?;
    Ok((rest, fold_binary(first, tail)))
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (rest, first) = parse_relation(input)?;
    let (rest, tail) =
        many0(pair(value(BinaryOp::And, ws(tag("&&"))), parse_relation))(rest)?;
    Ok((rest, fold_binary(first, tail)))
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (rest, first) = parse_and(input)?;
    let (rest, tail) = many0(pair(value(BinaryOp::Or, ws(tag("||"))), parse_and))(rest)?;
    Ok((rest, fold_binary(first, tail)))
}

/// Entry point: `cond ? a : b` binds loosest.
pub(crate) fn parse_expression(input: &str) -> IResult<&str, Expr> {
    let (rest, cond) = parse_or(input)?;
    let (rest, branches) = opt(tuple((
        ws(char('?')),
        parse_expression,
        ws(char(':')),
        parse_expression,
    )))(rest)?;
    let expr = match branches {
        Some((_, then, _, otherwise)) => {
            Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise))
        }
        None => cond,
    };
    Ok((rest, expr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Expr {
        Expr::Literal(Value::Int(i))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(int(1)),
                Box::new(Expr::Binary(BinaryOp::Mul, Box::new(int(2)), Box::new(int(3))))
            )
        );
    }

    #[test]
    fn test_subtraction_is_binary() {
        let expr = parse("3 - 7").unwrap();
        assert_eq!(expr, Expr::Binary(BinaryOp::Sub, Box::new(int(3)), Box::new(int(7))));
        assert_eq!(parse("-7").unwrap(), int(-7));
    }

    #[test]
    fn test_map_index_and_call() {
        let expr = parse(r#"int({"prime": "7"}[prime])"#).unwrap();
        match expr {
            Expr::Call { name, target: None, args } => {
                assert_eq!(name, "int");
                assert!(matches!(args[0], Expr::Index(_, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_dotted_identifier_and_method() {
        assert_eq!(parse("dns.domain").unwrap(), Expr::Ident("dns.domain".into()));
        match parse("dns.domain.endsWith('.com')").unwrap() {
            Expr::Call { name, target: Some(target), .. } => {
                assert_eq!(name, "endsWith");
                assert_eq!(*target, Expr::Ident("dns.domain".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_keywords() {
        assert_eq!(parse("true").unwrap(), Expr::Literal(Value::Bool(true)));
        assert_eq!(parse("trueish").unwrap(), Expr::Ident("trueish".into()));
        assert!(matches!(parse("x in [1, 2]").unwrap(), Expr::Binary(BinaryOp::In, _, _)));
        assert_eq!(parse("index").unwrap(), Expr::Ident("index".into()));
    }

    #[test]
    fn test_conditional() {
        assert!(matches!(parse("a == 'x' ? 1 : 2").unwrap(), Expr::Conditional(_, _, _)));
    }

    #[test]
    fn test_identifiers_collected() {
        let expr = parse("a + b.c * size(a) + d.startsWith(e)").unwrap();
        assert_eq!(expr.identifiers(), vec!["a", "b.c", "d", "e"]);
    }

    #[test]
    fn test_syntax_error_position() {
        match parse("1 +").unwrap_err() {
            ExpressionError::Syntax { position, .. } => assert!(position >= 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("(1").is_err());
    }
}
