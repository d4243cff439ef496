//! Expression evaluation against string bindings.

use super::parser::{BinaryOp, Expr, UnaryOp};
use super::value::Value;
use super::{Bindings, ExpressionError, ResolveMode};
use regex::Regex;
use std::cmp::Ordering;

type EvalResult = std::result::Result<Value, ExpressionError>;

pub(crate) struct Evaluator<'a> {
    bindings: &'a Bindings,
    mode: ResolveMode,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(bindings: &'a Bindings, mode: ResolveMode) -> Self {
        Self { bindings, mode }
    }

    pub(crate) fn lookup(&self, name: &str) -> EvalResult {
        match self.bindings.get(name) {
            Some(value) => Ok(Value::String(value.clone())),
            None => match self.mode {
                ResolveMode::AutoResolve => Ok(Value::String(format!("<{}>", name))),
                ResolveMode::Strict => Err(ExpressionError::Unresolved { name: name.to_string() }),
            },
        }
    }

    pub(crate) fn eval(&self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>()?,
            )),
            Expr::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((self.eval(k)?, self.eval(v)?));
                }
                Ok(Value::Map(out))
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                match (op, v) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Int(i)) => {
                        i.checked_neg().map(Value::Int).ok_or(overflow())
                    }
                    (UnaryOp::Neg, Value::Double(x)) => Ok(Value::Double(-x)),
                    (op, v) => Err(no_overload(&format!("{:?}", op), &[&v])),
                }
            }
            Expr::Binary(BinaryOp::And, l, r) => {
                if !self.eval_bool(l)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_bool(r)?))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                if self.eval_bool(l)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_bool(r)?))
            }
            Expr::Binary(op, l, r) => binary(*op, self.eval(l)?, self.eval(r)?),
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval_bool(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(&target, &index)
            }
            Expr::Call { name, target, args } => {
                let mut values = Vec::with_capacity(args.len() + 1);
                if let Some(t) = target {
                    values.push(self.eval(t)?);
                }
                for a in args {
                    values.push(self.eval(a)?);
                }
                call(name, target.is_some(), values)
            }
        }
    }

    fn eval_bool(&self, expr: &Expr) -> std::result::Result<bool, ExpressionError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::Type {
                reason: format!("expected bool, got {}", other.type_name()),
            }),
        }
    }
}

fn overflow() -> ExpressionError {
    ExpressionError::Type { reason: "integer overflow".to_string() }
}

fn no_overload(op: &str, args: &[&Value]) -> ExpressionError {
    let types: Vec<&str> = args.iter().map(|v| v.type_name()).collect();
    ExpressionError::Type {
        reason: format!("no matching overload for {}({})", op, types.join(", ")),
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> EvalResult {
    use Value::*;
    match op {
        BinaryOp::Eq => Ok(Bool(l.loose_eq(&r))),
        BinaryOp::Ne => Ok(Bool(!l.loose_eq(&r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = l.compare(&r).ok_or_else(|| no_overload(&format!("{:?}", op), &[&l, &r]))?;
            Ok(Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::In => match &r {
            List(items) => Ok(Bool(items.iter().any(|i| i.loose_eq(&l)))),
            Map(_) => Ok(Bool(r.map_get(&l).is_some())),
            _ => Err(no_overload("in", &[&l, &r])),
        },
        BinaryOp::Add => match (l, r) {
            (Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or(overflow()),
            (Double(a), Double(b)) => Ok(Double(a + b)),
            (Int(a), Double(b)) => Ok(Double(a as f64 + b)),
            (Double(a), Int(b)) => Ok(Double(a + b as f64)),
            (String(a), String(b)) => Ok(String(a + &b)),
            (List(mut a), List(b)) => {
                a.extend(b);
                Ok(List(a))
            }
            (l, r) => Err(no_overload("+", &[&l, &r])),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => arithmetic(op, l, r),
        BinaryOp::And | BinaryOp::Or => Err(ExpressionError::Type {
            reason: "logical operators are evaluated lazily".to_string(),
        }),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> EvalResult {
    use Value::*;
    match (l, r) {
        (Int(a), Int(b)) => {
            let result = match op {
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                    return Err(ExpressionError::DivisionByZero)
                }
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Int).ok_or(overflow())
        }
        (Int(a), Double(b)) => float_op(op, a as f64, b),
        (Double(a), Int(b)) => float_op(op, a, b as f64),
        (Double(a), Double(b)) => float_op(op, a, b),
        (l, r) => Err(no_overload(&format!("{:?}", op), &[&l, &r])),
    }
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> EvalResult {
    Ok(Value::Double(match op {
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    }))
}

fn index_value(target: &Value, index: &Value) -> EvalResult {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| ExpressionError::Index { reason: format!("index {} out of range", i) }),
        (Value::Map(_), key) => target
            .map_get(key)
            .cloned()
            .ok_or_else(|| ExpressionError::Index { reason: format!("no such key: {}", key) }),
        (t, i) => Err(no_overload("[]", &[t, i])),
    }
}

fn call(name: &str, is_method: bool, args: Vec<Value>) -> EvalResult {
    let fail = |reason: String| ExpressionError::Function { name: name.to_string(), reason };
    let arity = |n: usize| -> std::result::Result<(), ExpressionError> {
        if args.len() == n {
            Ok(())
        } else {
            Err(fail(format!("expected {} argument(s), got {}", n, args.len())))
        }
    };

    match name {
        "int" => {
            arity(1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Double(x) if x.is_finite() => Ok(Value::Int(x.trunc() as i64)),
                Value::String(s) => {
                    s.trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| fail(format!("cannot convert '{}' to int", s)))
                }
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                other => Err(fail(format!("cannot convert {} to int", other.type_name()))),
            }
        }
        "uint" => {
            arity(1)?;
            match call("int", false, args.clone())? {
                Value::Int(i) if i >= 0 => Ok(Value::Int(i)),
                _ => Err(fail("negative value".to_string())),
            }
        }
        "double" => {
            arity(1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Double(*i as f64)),
                Value::Double(x) => Ok(Value::Double(*x)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|_| fail(format!("cannot convert '{}' to double", s))),
                other => Err(fail(format!("cannot convert {} to double", other.type_name()))),
            }
        }
        "string" => {
            arity(1)?;
            Ok(Value::String(args[0].to_string()))
        }
        "bool" => {
            arity(1)?;
            match &args[0] {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) => match s.as_str() {
                    "true" | "True" | "TRUE" | "1" => Ok(Value::Bool(true)),
                    "false" | "False" | "FALSE" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail(format!("cannot convert '{}' to bool", s))),
                },
                other => Err(fail(format!("cannot convert {} to bool", other.type_name()))),
            }
        }
        "size" => {
            arity(1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(l) => Ok(Value::Int(l.len() as i64)),
                Value::Map(m) => Ok(Value::Int(m.len() as i64)),
                other => Err(fail(format!("size of {}", other.type_name()))),
            }
        }
        "startsWith" | "endsWith" | "contains" | "matches" if is_method => {
            arity(2)?;
            match (&args[0], &args[1]) {
                (Value::String(s), Value::String(p)) => Ok(Value::Bool(match name {
                    "startsWith" => s.starts_with(p.as_str()),
                    "endsWith" => s.ends_with(p.as_str()),
                    "contains" => s.contains(p.as_str()),
                    _ => Regex::new(p).map_err(|e| fail(e.to_string()))?.is_match(s),
                })),
                (Value::List(items), needle) if name == "contains" => {
                    Ok(Value::Bool(items.iter().any(|i| i.loose_eq(needle))))
                }
                (a, b) => Err(no_overload(name, &[a, b])),
            }
        }
        "lowerAscii" | "upperAscii" | "trim" if is_method => {
            arity(1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::String(match name {
                    "lowerAscii" => s.to_ascii_lowercase(),
                    "upperAscii" => s.to_ascii_uppercase(),
                    _ => s.trim().to_string(),
                })),
                other => Err(no_overload(name, &[other])),
            }
        }
        "split" if is_method => {
            arity(2)?;
            match (&args[0], &args[1]) {
                (Value::String(s), Value::String(sep)) => Ok(Value::List(
                    s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect(),
                )),
                (a, b) => Err(no_overload(name, &[a, b])),
            }
        }
        "join" if is_method => {
            let sep = match args.get(1) {
                Some(Value::String(s)) => s.clone(),
                None => String::new(),
                Some(other) => return Err(no_overload(name, &[other])),
            };
            match &args[0] {
                Value::List(items) => Ok(Value::String(
                    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(&sep),
                )),
                other => Err(no_overload(name, &[other])),
            }
        }
        _ => Err(ExpressionError::Function {
            name: name.to_string(),
            reason: "unknown function".to_string(),
        }),
    }
}
