//! Edge condition expressions.
//!
//! A condition is a boolean expression over the cycle state: equality and
//! comparison on numeric/string fields plus conjunction/disjunction, e.g.
//!
//! ```text
//! symbols_count > 0 && balance.free >= 100
//! pause_requested == null || cycle_id < 5
//! ```
//!
//! Field paths are dotted lookups into the JSON projection of CycleState.

use serde_json::Value;

use crate::error::{ConclaveError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(bad(input, "expected '&&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(bad(input, "expected '||'"));
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(bad(input, "expected '=='"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(bad(input, "expected '!='"));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(bad(input, "unterminated string"));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| bad(input, &format!("bad number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => return Err(bad(input, &format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

fn bad(expr: &str, reason: &str) -> ConclaveError {
    ConclaveError::Workflow(format!("invalid condition '{}': {}", expr, reason))
}

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Cmp {
        path: String,
        op: CmpOp,
        literal: Literal,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<Condition> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition> {
        let mut left = self.parse_cmp()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_cmp()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Condition> {
        if self.peek() == Some(&Token::LParen) {
            self.next();
            let inner = self.parse_or()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(bad(self.source, "missing ')'")),
            }
        }

        let path = match self.next() {
            Some(Token::Ident(p)) => p,
            _ => return Err(bad(self.source, "expected field path")),
        };
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            _ => return Err(bad(self.source, "expected comparison operator")),
        };
        let literal = match self.next() {
            Some(Token::Number(n)) => Literal::Number(n),
            Some(Token::Str(s)) => Literal::Str(s),
            Some(Token::Bool(b)) => Literal::Bool(b),
            Some(Token::Null) => Literal::Null,
            _ => return Err(bad(self.source, "expected literal")),
        };

        Ok(Condition::Cmp { path, op, literal })
    }
}

impl Condition {
    /// Parse a condition expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err(bad(expr, "empty expression"));
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            source: expr,
        };
        let cond = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(bad(expr, "trailing tokens"));
        }
        Ok(cond)
    }

    /// Evaluate against the JSON projection of the state. Missing fields
    /// compare as null.
    pub fn eval(&self, state: &Value) -> bool {
        match self {
            Condition::And(l, r) => l.eval(state) && r.eval(state),
            Condition::Or(l, r) => l.eval(state) || r.eval(state),
            Condition::Cmp { path, op, literal } => {
                let field = lookup(state, path);
                compare(field, *op, literal)
            }
        }
    }
}

fn lookup<'v>(state: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = state;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn compare(field: Option<&Value>, op: CmpOp, literal: &Literal) -> bool {
    use CmpOp::*;

    match literal {
        Literal::Null => {
            let is_null = matches!(field, None | Some(Value::Null));
            match op {
                Eq => is_null,
                Ne => !is_null,
                _ => false,
            }
        }
        Literal::Bool(b) => match (field.and_then(Value::as_bool), op) {
            (Some(v), Eq) => v == *b,
            (Some(v), Ne) => v != *b,
            _ => matches!(op, Ne) && field.and_then(Value::as_bool).is_none(),
        },
        Literal::Str(s) => match (field.and_then(Value::as_str), op) {
            (Some(v), Eq) => v == s,
            (Some(v), Ne) => v != s,
            (Some(v), Gt) => v > s.as_str(),
            (Some(v), Ge) => v >= s.as_str(),
            (Some(v), Lt) => v < s.as_str(),
            (Some(v), Le) => v <= s.as_str(),
            (None, Ne) => true,
            _ => false,
        },
        Literal::Number(n) => {
            let v = match field {
                Some(Value::Number(num)) => num.as_f64(),
                Some(Value::String(s)) => s.parse::<f64>().ok(),
                _ => None,
            };
            match (v, op) {
                (Some(v), Eq) => (v - n).abs() < f64::EPSILON,
                (Some(v), Ne) => (v - n).abs() >= f64::EPSILON,
                (Some(v), Gt) => v > *n,
                (Some(v), Ge) => v >= *n,
                (Some(v), Lt) => v < *n,
                (Some(v), Le) => v <= *n,
                (None, Ne) => true,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Value {
        json!({
            "cycle_id": 7,
            "pause_requested": null,
            "balance": {"free": 250.5, "currency": "USDT"},
            "config_snapshot": {"trading_mode": "paper"},
            "symbols": ["BTC/USDT"],
        })
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(Condition::parse("cycle_id > 5").unwrap().eval(&state()));
        assert!(Condition::parse("cycle_id <= 7").unwrap().eval(&state()));
        assert!(!Condition::parse("cycle_id == 8").unwrap().eval(&state()));
    }

    #[test]
    fn test_nested_path() {
        assert!(Condition::parse("balance.free >= 100")
            .unwrap()
            .eval(&state()));
        assert!(Condition::parse("balance.currency == 'USDT'")
            .unwrap()
            .eval(&state()));
    }

    #[test]
    fn test_null_checks() {
        assert!(Condition::parse("pause_requested == null")
            .unwrap()
            .eval(&state()));
        assert!(Condition::parse("missing.field == null")
            .unwrap()
            .eval(&state()));
        assert!(!Condition::parse("cycle_id == null").unwrap().eval(&state()));
    }

    #[test]
    fn test_conjunction_and_disjunction() {
        let c = Condition::parse("cycle_id > 5 && balance.free > 100").unwrap();
        assert!(c.eval(&state()));

        let c = Condition::parse("cycle_id > 100 || balance.currency == 'USDT'").unwrap();
        assert!(c.eval(&state()));

        let c = Condition::parse("cycle_id > 100 && balance.currency == 'USDT'").unwrap();
        assert!(!c.eval(&state()));
    }

    #[test]
    fn test_parentheses() {
        let c = Condition::parse("(cycle_id > 100 || cycle_id < 10) && balance.free > 0").unwrap();
        assert!(c.eval(&state()));
    }

    #[test]
    fn test_string_mode_check() {
        assert!(Condition::parse("config_snapshot.trading_mode == 'paper'")
            .unwrap()
            .eval(&state()));
        assert!(Condition::parse("config_snapshot.trading_mode != 'live'")
            .unwrap()
            .eval(&state()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("cycle_id >").is_err());
        assert!(Condition::parse("cycle_id = 5").is_err());
        assert!(Condition::parse("a == 1 &&").is_err());
        assert!(Condition::parse("(a == 1").is_err());
    }

    #[test]
    fn test_missing_field_ne_is_true() {
        assert!(Condition::parse("nonexistent != 'x'").unwrap().eval(&state()));
        assert!(Condition::parse("nonexistent != 3").unwrap().eval(&state()));
    }
}
