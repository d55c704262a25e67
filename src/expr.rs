//! Guard expressions for conditional output paths.
//!
//! A guard is either the literal `default` or a boolean expression over
//! parameter ids:
//!
//! ```text
//! guard   := "default" | or
//! or      := and ("or" and)*
//! and     := primary ("and" primary)*
//! primary := "(" or ")" | operand (cmp operand)?
//! cmp     := "==" | "!=" | "<" | ">" | "<=" | ">="
//! operand := id | number | 'string' | "string" | true | false
//! ```
//!
//! The validator type-checks guards with [`Guard::check`]; the renderer
//! evaluates them with [`Guard::evaluate`].

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Bool(bool),
    And,
    Or,
    Cmp(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Id(String),
    Number(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    Operand(Operand),
    Group(Box<Expr>),
}

/// Static type of an operand, with `File` folded into `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    Number,
    String,
    Flag,
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperandType::Number => "Number",
            OperandType::String => "String",
            OperandType::Flag => "Flag",
        };
        f.write_str(name)
    }
}

/// A parsed guard.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Default,
    Expr(Expr),
}

impl Guard {
    pub fn parse(text: &str) -> Result<Self, String> {
        if text.trim() == "default" {
            return Ok(Guard::Default);
        }
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!(
                "unexpected token {:?} at position {}",
                parser.tokens[parser.pos], parser.pos
            ));
        }
        Ok(Guard::Expr(expr))
    }

    /// Ids referenced by the guard, in order of appearance.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if let Guard::Expr(expr) = self {
            collect_ids(expr, &mut ids);
        }
        ids
    }

    /// Type-check the guard. `type_of` resolves an id to its operand type,
    /// or `None` when the id is not a known parameter.
    pub fn check<F>(&self, type_of: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<OperandType>,
    {
        match self {
            Guard::Default => Ok(()),
            Guard::Expr(expr) => check_expr(expr, &type_of),
        }
    }

    /// Evaluate against resolved values. A guard that references an id with
    /// no value is false as a whole.
    pub fn evaluate<F>(&self, value_of: F) -> bool
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            Guard::Default => true,
            Guard::Expr(expr) => {
                if self.ids().iter().any(|id| value_of(id).is_none()) {
                    return false;
                }
                truthy(&eval_expr(expr, &value_of))
            }
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        if ch.is_whitespace() {
            idx += 1;
            continue;
        }
        match ch {
            '(' => {
                tokens.push(Token::LParen);
                idx += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                idx += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next_is_eq = chars.get(idx + 1) == Some(&'=');
                let op = match (ch, next_is_eq) {
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    ('<', true) => CmpOp::Le,
                    ('>', true) => CmpOp::Ge,
                    ('<', false) => CmpOp::Lt,
                    ('>', false) => CmpOp::Gt,
                    _ => return Err(format!("invalid operator at position {idx}")),
                };
                tokens.push(Token::Cmp(op));
                idx += if next_is_eq { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = ch;
                let start = idx + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                idx = end + 1;
            }
            _ if ch.is_ascii_digit() || ch == '.' || ch == '-' => {
                let start = idx;
                idx += 1;
                while idx < chars.len()
                    && (chars[idx].is_alphanumeric() || chars[idx] == '_' || chars[idx] == '.')
                {
                    idx += 1;
                }
                let word: String = chars[start..idx].iter().collect();
                // Ids may start with a digit: `2a` names a parameter.
                let token = match word.parse::<f64>() {
                    Ok(number) => Token::Number(number),
                    Err(_) if word.chars().all(|c| c.is_alphanumeric() || c == '_') => {
                        Token::Ident(word)
                    }
                    Err(_) => return Err(format!("invalid number {word:?}")),
                };
                tokens.push(token);
            }
            _ if ch.is_alphanumeric() || ch == '_' => {
                let start = idx;
                while idx < chars.len() && (chars[idx].is_alphanumeric() || chars[idx] == '_') {
                    idx += 1;
                }
                let word: String = chars[start..idx].iter().collect();
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            _ => return Err(format!("unexpected character {ch:?}")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut terms = vec![self.and_expr()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut terms = vec![self.primary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.primary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn primary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or_expr()?;
            if self.next() != Some(Token::RParen) {
                return Err("missing closing parenthesis".to_string());
            }
            return Ok(Expr::Group(Box::new(inner)));
        }
        let lhs = self.operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.operand()?;
            return Ok(Expr::Compare { lhs, op, rhs });
        }
        Ok(Expr::Operand(lhs))
    }

    fn operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Ident(id)) => Ok(Operand::Id(id)),
            Some(Token::Number(number)) => Ok(Operand::Number(number)),
            Some(Token::Str(text)) => Ok(Operand::Str(text)),
            Some(Token::Bool(value)) => Ok(Operand::Bool(value)),
            Some(token) => Err(format!("expected a value, found {token:?}")),
            None => Err("expression ends early".to_string()),
        }
    }
}

fn collect_ids<'a>(expr: &'a Expr, ids: &mut Vec<&'a str>) {
    match expr {
        Expr::Or(terms) | Expr::And(terms) => {
            for term in terms {
                collect_ids(term, ids);
            }
        }
        Expr::Compare { lhs, rhs, .. } => {
            for operand in [lhs, rhs] {
                if let Operand::Id(id) = operand {
                    ids.push(id);
                }
            }
        }
        Expr::Operand(Operand::Id(id)) => ids.push(id),
        Expr::Operand(_) => {}
        Expr::Group(inner) => collect_ids(inner, ids),
    }
}

fn operand_type<F>(operand: &Operand, type_of: &F) -> Result<OperandType, String>
where
    F: Fn(&str) -> Option<OperandType>,
{
    match operand {
        Operand::Id(id) => type_of(id).ok_or_else(|| format!("non-ID string: \"{id}\"")),
        Operand::Number(_) => Ok(OperandType::Number),
        Operand::Str(_) => Ok(OperandType::String),
        Operand::Bool(_) => Ok(OperandType::Flag),
    }
}

fn check_expr<F>(expr: &Expr, type_of: &F) -> Result<(), String>
where
    F: Fn(&str) -> Option<OperandType>,
{
    match expr {
        Expr::Or(terms) | Expr::And(terms) => {
            for term in terms {
                match term {
                    Expr::Operand(Operand::Number(_) | Operand::Str(_)) => {
                        return Err("and/or operands must be ids, booleans or sub-expressions"
                            .to_string());
                    }
                    _ => check_expr(term, type_of)?,
                }
            }
            Ok(())
        }
        Expr::Compare { lhs, op, rhs } => {
            let left = operand_type(lhs, type_of)?;
            let right = operand_type(rhs, type_of)?;
            if left != right {
                return Err(format!(
                    "cannot compare {left} {} {right}",
                    op.as_str()
                ));
            }
            Ok(())
        }
        Expr::Operand(operand @ Operand::Id(id)) => match operand_type(operand, type_of)? {
            OperandType::Flag => Ok(()),
            other => Err(format!(
                "\"{id}\" is a {other}; only Flag ids can stand alone or join and/or"
            )),
        },
        Expr::Operand(Operand::Bool(_)) => Ok(()),
        Expr::Operand(_) => Err("a bare literal is not a condition".to_string()),
        Expr::Group(inner) => check_expr(inner, type_of),
    }
}

#[derive(Debug, Clone)]
enum Scalar {
    Number(f64),
    Str(String),
    Bool(bool),
    List(usize),
    Null,
}

fn scalar_of(value: &Value) -> Scalar {
    match value {
        Value::Number(number) => number.as_f64().map_or(Scalar::Null, Scalar::Number),
        Value::String(text) => Scalar::Str(text.clone()),
        Value::Bool(value) => Scalar::Bool(*value),
        Value::Array(items) => Scalar::List(items.len()),
        Value::Object(map) => Scalar::List(map.len()),
        Value::Null => Scalar::Null,
    }
}

fn resolve<F>(operand: &Operand, value_of: &F) -> Scalar
where
    F: Fn(&str) -> Option<Value>,
{
    match operand {
        Operand::Id(id) => value_of(id).as_ref().map_or(Scalar::Null, scalar_of),
        Operand::Number(number) => Scalar::Number(*number),
        Operand::Str(text) => Scalar::Str(text.clone()),
        Operand::Bool(value) => Scalar::Bool(*value),
    }
}

fn truthy(scalar: &Scalar) -> bool {
    match scalar {
        Scalar::Number(number) => *number != 0.0,
        Scalar::Str(text) => !text.is_empty(),
        Scalar::Bool(value) => *value,
        Scalar::List(len) => *len > 0,
        Scalar::Null => false,
    }
}

fn compare(lhs: &Scalar, op: CmpOp, rhs: &Scalar) -> bool {
    let ordering = match (lhs, rhs) {
        (Scalar::Number(a), Scalar::Number(b)) => a.partial_cmp(b),
        // String values that look numeric compare numerically.
        (Scalar::Str(a), Scalar::Number(b)) => a.trim().parse::<f64>().ok().and_then(|a| a.partial_cmp(b)),
        (Scalar::Number(a), Scalar::Str(b)) => b.trim().parse::<f64>().ok().and_then(|b| a.partial_cmp(&b)),
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match ordering {
        Some(ordering) => op.holds(ordering),
        None => op == CmpOp::Ne,
    }
}

fn eval_expr<F>(expr: &Expr, value_of: &F) -> Scalar
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Or(terms) => Scalar::Bool(terms.iter().any(|term| truthy(&eval_expr(term, value_of)))),
        Expr::And(terms) => Scalar::Bool(terms.iter().all(|term| truthy(&eval_expr(term, value_of)))),
        Expr::Compare { lhs, op, rhs } => Scalar::Bool(compare(
            &resolve(lhs, value_of),
            *op,
            &resolve(rhs, value_of),
        )),
        Expr::Operand(operand) => resolve(operand, value_of),
        Expr::Group(inner) => eval_expr(inner, value_of),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn types(id: &str) -> Option<OperandType> {
        match id {
            "flag1" | "flag2" => Some(OperandType::Flag),
            "num" => Some(OperandType::Number),
            "text" => Some(OperandType::String),
            _ => None,
        }
    }

    #[test]
    fn parses_precedence_and_groups() {
        let guard = Guard::parse("flag1 or flag2 and (num > 2)").expect("parse");
        let Guard::Expr(Expr::Or(terms)) = guard else {
            panic!("expected or at the top");
        };
        assert_eq!(terms.len(), 2);
        assert!(matches!(terms[1], Expr::And(_)));
    }

    #[test]
    fn default_is_its_own_guard() {
        assert_eq!(Guard::parse(" default ").expect("parse"), Guard::Default);
    }

    #[test]
    fn type_check_rejects_mismatched_comparisons() {
        let check = |text: &str| Guard::parse(text).expect("parse").check(types);
        assert!(check("num > 10").is_ok());
        assert!(check("text == 'abc'").is_ok());
        assert!(check("flag1 and flag2 and (num <= 3.5)").is_ok());
        assert!(check("flag1 and (num > \"10.00\")").is_err());
        assert!(check("flag1 and flag2 and (flag1 == \"False\")").is_err());
        assert!(check("text < 10.0").is_err());
        assert!(check("flag1 and 3").is_err());
    }

    #[test]
    fn and_or_chains_need_flag_ids() {
        let check = |text: &str| Guard::parse(text).expect("parse").check(types);
        assert!(check("flag1 or flag2").is_ok());
        let err = check("text and num").expect_err("string and number");
        assert!(err.contains("\"text\" is a String"), "{err}");
        assert!(check("flag1 and num").is_err());
        assert!(check("num").is_err());
        assert!(check("flag1 and (num > 2)").is_ok());
    }

    #[test]
    fn digit_leading_words_are_ids() {
        let guard = Guard::parse("2a and num > 1.5").expect("parse");
        assert_eq!(guard.ids(), vec!["2a", "num"]);
        assert!(guard.evaluate(|id| match id {
            "2a" => Some(json!(true)),
            _ => Some(json!(2)),
        }));
        assert!(Guard::parse("num > -3").is_ok());
        assert!(Guard::parse("num > 1.2.3").is_err());
    }

    #[test]
    fn type_check_reports_unknown_ids() {
        let err = Guard::parse("bob")
            .expect("parse")
            .check(types)
            .expect_err("unknown");
        assert!(err.contains("\"bob\""), "{err}");
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(Guard::parse("(num > 2").is_err());
        assert!(Guard::parse("num >").is_err());
        assert!(Guard::parse("num = 2").is_err());
        assert!(Guard::parse("'open").is_err());
    }

    #[test]
    fn evaluates_against_values() {
        let values = |id: &str| match id {
            "num" => Some(json!(5)),
            "text" => Some(json!("abc")),
            "flag1" => Some(json!(true)),
            "flag2" => Some(json!(false)),
            _ => None,
        };
        let eval = |text: &str| Guard::parse(text).expect("parse").evaluate(values);
        assert!(eval("num > 2"));
        assert!(!eval("num >= 6"));
        assert!(eval("text == \"abc\""));
        assert!(!eval("flag1 and not_there == 1"));
        assert!(!eval("flag2"));
        assert!(eval("flag1 or flag2"));
        assert!(!eval("flag1 and (num < 0)"));
    }

    #[test]
    fn absent_ids_make_the_guard_false() {
        let guard = Guard::parse("missing or num > 0").expect("parse");
        assert!(!guard.evaluate(|id| (id == "num").then(|| json!(3))));
        assert_eq!(guard.ids(), vec!["missing", "num"]);
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        let guard = Guard::parse("text > 2").expect("parse");
        assert!(guard.evaluate(|_| Some(json!("10"))));
    }
}
