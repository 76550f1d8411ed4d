//! Key template evaluation.
//!
//! A template without `#` or `T(` is a literal and is returned unchanged.
//! Anything else is parsed as a small expression language bound against the
//! call's named arguments:
//!
//! ```text
//! expr     := term ('+' term)*
//! term     := 'string' | number | true | false | null | variable
//! variable := '#' ident ( '.' ident | '?.' ident | '[' index ']' )*
//! index    := integer | 'string'
//! ```
//!
//! `+` concatenates the string forms of its operands. There are no method
//! calls, type references or arithmetic; the language cannot execute code.
//!
//! # Example
//!
//! ```ignore
//! let key = parse_key("'order:' + #order.id", &[("order".into(), json!({"id": 7}))])?;
//! assert_eq!(key, "order:7");
//! ```

use serde_json::Value;
use tollgate_core::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(String),
    Ident(String),
    Hash,
    Dot,
    SafeDot,
    LBracket,
    RBracket,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
enum Access {
    Field { name: String, null_safe: bool },
    Index(usize),
    Key(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Literal(Value),
    Variable { name: String, path: Vec<Access> },
}

/// True when `template` needs evaluation rather than literal use.
pub fn is_expression(template: &str) -> bool {
    template.contains('#') || template.contains("T(")
}

/// Resolve a key template against named arguments.
///
/// Literal templates pass through; expressions must evaluate to a non-null
/// value, whose string form is returned.
pub fn parse_key(template: &str, params: &[(String, Value)]) -> Result<String, ExpressionError> {
    if !is_expression(template) {
        return Ok(template.to_string());
    }
    let value = evaluate(template, params)?;
    match value {
        Value::Null => Err(ExpressionError::NullResult {
            expression: template.to_string(),
        }),
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Evaluate an expression to a JSON value.
pub fn evaluate(expression: &str, params: &[(String, Value)]) -> Result<Value, ExpressionError> {
    if expression.contains("T(") {
        return Err(parse_error(expression, "type references are not supported"));
    }
    let tokens = tokenize(expression)?;
    let terms = parse(expression, &tokens)?;
    let mut values = Vec::with_capacity(terms.len());
    for term in &terms {
        values.push(eval_term(expression, term, params)?);
    }
    if values.len() == 1 {
        return Ok(values.remove(0));
    }
    let mut joined = String::new();
    for value in values {
        match value {
            Value::String(s) => joined.push_str(&s),
            Value::Null => joined.push_str("null"),
            other => joined.push_str(&other.to_string()),
        }
    }
    Ok(Value::String(joined))
}

fn parse_error(expression: &str, reason: impl Into<String>) -> ExpressionError {
    ExpressionError::Parse {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '#' => {
                tokens.push(Token::Hash);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '?' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::SafeDot);
                i += 2;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                        None => return Err(parse_error(expression, "unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // A dot not followed by a digit ends the number.
                    if chars[i] == '.' && !chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token::Num(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(parse_error(
                    expression,
                    format!("unexpected character '{}' at {}", other, i),
                ))
            }
        }
    }
    Ok(tokens)
}

fn parse(expression: &str, tokens: &[Token]) -> Result<Vec<Term>, ExpressionError> {
    let mut terms = Vec::new();
    let mut pos = 0;
    loop {
        let (term, next) = parse_term(expression, tokens, pos)?;
        terms.push(term);
        pos = next;
        match tokens.get(pos) {
            None => break,
            Some(Token::Plus) => pos += 1,
            Some(other) => {
                return Err(parse_error(
                    expression,
                    format!("expected '+' but found {:?}", other),
                ))
            }
        }
    }
    Ok(terms)
}

fn parse_term(
    expression: &str,
    tokens: &[Token],
    pos: usize,
) -> Result<(Term, usize), ExpressionError> {
    match tokens.get(pos) {
        Some(Token::Str(s)) => Ok((Term::Literal(Value::String(s.clone())), pos + 1)),
        Some(Token::Num(n)) => {
            let value = if let Ok(i) = n.parse::<i64>() {
                Value::from(i)
            } else {
                let f: f64 = n
                    .parse()
                    .map_err(|_| parse_error(expression, format!("invalid number {}", n)))?;
                Value::from(f)
            };
            Ok((Term::Literal(value), pos + 1))
        }
        Some(Token::Ident(word)) => match word.as_str() {
            "true" => Ok((Term::Literal(Value::Bool(true)), pos + 1)),
            "false" => Ok((Term::Literal(Value::Bool(false)), pos + 1)),
            "null" => Ok((Term::Literal(Value::Null), pos + 1)),
            other => Err(parse_error(
                expression,
                format!("bare identifier '{}'; variables start with '#'", other),
            )),
        },
        Some(Token::Hash) => parse_variable(expression, tokens, pos + 1),
        Some(other) => Err(parse_error(
            expression,
            format!("unexpected token {:?}", other),
        )),
        None => Err(parse_error(expression, "unexpected end of expression")),
    }
}

fn parse_variable(
    expression: &str,
    tokens: &[Token],
    mut pos: usize,
) -> Result<(Term, usize), ExpressionError> {
    let name = match tokens.get(pos) {
        Some(Token::Ident(name)) => name.clone(),
        _ => return Err(parse_error(expression, "expected variable name after '#'")),
    };
    pos += 1;
    let mut path = Vec::new();
    loop {
        match tokens.get(pos) {
            Some(Token::Dot) | Some(Token::SafeDot) => {
                let null_safe = tokens.get(pos) == Some(&Token::SafeDot);
                match tokens.get(pos + 1) {
                    Some(Token::Ident(field)) => {
                        path.push(Access::Field {
                            name: field.clone(),
                            null_safe,
                        });
                        pos += 2;
                    }
                    _ => return Err(parse_error(expression, "expected field name after '.'")),
                }
            }
            Some(Token::LBracket) => {
                let access = match tokens.get(pos + 1) {
                    Some(Token::Num(n)) => Access::Index(n.parse().map_err(|_| {
                        parse_error(expression, format!("invalid index {}", n))
                    })?),
                    Some(Token::Str(key)) => Access::Key(key.clone()),
                    _ => return Err(parse_error(expression, "expected index or key in '[]'")),
                };
                if tokens.get(pos + 2) != Some(&Token::RBracket) {
                    return Err(parse_error(expression, "expected ']'"));
                }
                path.push(access);
                pos += 3;
            }
            _ => break,
        }
    }
    Ok((Term::Variable { name, path }, pos))
}

/// Value of an absent field; the walk continues through it.
static NULL: Value = Value::Null;

fn eval_term(
    expression: &str,
    term: &Term,
    params: &[(String, Value)],
) -> Result<Value, ExpressionError> {
    let (name, path) = match term {
        Term::Literal(value) => return Ok(value.clone()),
        Term::Variable { name, path } => (name, path),
    };
    let mut current = params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
        .ok_or_else(|| ExpressionError::UnknownVariable { name: name.clone() })?;

    for access in path {
        let invalid = |reason: String| ExpressionError::InvalidAccess {
            expression: expression.to_string(),
            reason,
        };
        current = match (access, current) {
            (Access::Field { null_safe: true, .. }, Value::Null) => return Ok(Value::Null),
            (Access::Field { name, .. }, Value::Null) => {
                return Err(invalid(format!("field '{}' accessed on null", name)))
            }
            (Access::Field { name, .. }, Value::Object(map)) => map.get(name).unwrap_or(&NULL),
            (Access::Field { name, .. }, other) => {
                return Err(invalid(format!("field '{}' accessed on {}", name, other)))
            }
            (Access::Index(i), Value::Array(items)) => items
                .get(*i)
                .ok_or_else(|| invalid(format!("index {} out of bounds ({})", i, items.len())))?,
            (Access::Key(key), Value::Object(map)) => map.get(key).unwrap_or(&NULL),
            (Access::Index(i), other) => {
                return Err(invalid(format!("index {} applied to {}", i, other)))
            }
            (Access::Key(key), other) => {
                return Err(invalid(format!("key '{}' applied to {}", key, other)))
            }
        };
    }
    Ok(current.clone())
}
