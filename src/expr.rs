//! Integer expression evaluator shared by the preprocessor and the offset resolver.
//!
//! Infix text is converted to reverse Polish notation with the shunting-yard
//! algorithm and evaluated on a value stack. Identifiers (labels, `equ`
//! constants, `$`, `$$`, preprocessor variables) go through a
//! [`KeywordResolver`] supplied by the caller.

use crate::error::MathError;
use crate::token::{is_ident_char, is_ident_start, parse_number_literal};

/// Resolves a bare name inside an expression to a number.
pub trait KeywordResolver {
    fn resolve(&self, name: &str) -> Option<i64>;
}

impl<F> KeywordResolver for F
where
    F: Fn(&str) -> Option<i64>,
{
    fn resolve(&self, name: &str) -> Option<i64> {
        self(name)
    }
}

/// Resolver that knows no names at all.
pub struct NoKeywords;

impl KeywordResolver for NoKeywords {
    fn resolve(&self, _name: &str) -> Option<i64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Neg,
    Pos,
    BitNot,
    LogicNot,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicAnd,
    LogicOr,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Neg | Op::Pos | Op::BitNot | Op::LogicNot => 11,
            Op::Mul | Op::Div | Op::Mod => 10,
            Op::Add | Op::Sub => 9,
            Op::Shl | Op::Shr => 8,
            Op::Lt | Op::Le | Op::Gt | Op::Ge => 7,
            Op::Eq | Op::Ne => 6,
            Op::BitAnd => 5,
            Op::BitXor => 4,
            Op::BitOr => 3,
            Op::LogicAnd => 2,
            Op::LogicOr => 1,
        }
    }

    fn is_unary(self) -> bool {
        matches!(self, Op::Neg | Op::Pos | Op::BitNot | Op::LogicNot)
    }

    fn binary(text: &str) -> Option<Op> {
        Some(match text {
            "*" => Op::Mul,
            "/" => Op::Div,
            "%" => Op::Mod,
            "+" => Op::Add,
            "-" => Op::Sub,
            "<<" => Op::Shl,
            ">>" => Op::Shr,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "==" | "=" => Op::Eq,
            "!=" | "<>" => Op::Ne,
            "&" => Op::BitAnd,
            "^" => Op::BitXor,
            "|" => Op::BitOr,
            "&&" => Op::LogicAnd,
            "||" => Op::LogicOr,
            _ => return None,
        })
    }

    fn unary(text: &str) -> Option<Op> {
        Some(match text {
            "-" => Op::Neg,
            "+" => Op::Pos,
            "~" => Op::BitNot,
            "!" => Op::LogicNot,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Number(i64),
    Ident(String),
    Op(Op),
    LParen,
    RParen,
}

fn incorrect(expression: &str) -> MathError {
    MathError::IncorrectExpression {
        expression: expression.to_string(),
    }
}

fn lex(expression: &str) -> Result<Vec<ExprToken>, MathError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    // operand position decides between unary and binary +/-
    let expects_operand = |out: &Vec<ExprToken>| {
        matches!(out.last(), None | Some(ExprToken::Op(_)) | Some(ExprToken::LParen))
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                out.push(ExprToken::LParen);
                i += 1;
            }
            ')' => {
                out.push(ExprToken::RParen);
                i += 1;
            }
            '\'' | '"' | '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&x| x == c)
                    .ok_or_else(|| incorrect(expression))?;
                // little-endian packing like NASM character constants
                let value = chars[i + 1..i + 1 + end]
                    .iter()
                    .take(8)
                    .enumerate()
                    .fold(0i64, |acc, (n, &ch)| acc | (((ch as u32 & 0xFF) as i64) << (8 * n)));
                out.push(ExprToken::Number(value));
                i += end + 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let (_, value) = parse_number_literal(&word).ok_or_else(|| incorrect(expression))?;
                out.push(ExprToken::Number(value));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                out.push(ExprToken::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let (text, len) = if Op::binary(&two).is_some() && two.chars().count() == 2 {
                    (two, 2)
                } else {
                    (c.to_string(), 1)
                };
                let op = if expects_operand(&out) {
                    Op::unary(&text)
                } else {
                    Op::binary(&text)
                }
                .ok_or_else(|| incorrect(expression))?;
                out.push(ExprToken::Op(op));
                i += len;
            }
        }
    }
    Ok(out)
}

fn to_rpn(tokens: Vec<ExprToken>, expression: &str) -> Result<Vec<ExprToken>, MathError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<ExprToken> = Vec::new();

    for token in tokens {
        match token {
            ExprToken::Number(_) | ExprToken::Ident(_) => output.push(token),
            ExprToken::Op(op) => {
                while let Some(ExprToken::Op(top)) = stack.last() {
                    let top = *top;
                    // unary operators are right associative
                    let pops = if op.is_unary() {
                        false
                    } else {
                        top.precedence() >= op.precedence()
                    };
                    if !pops {
                        break;
                    }
                    output.push(ExprToken::Op(top));
                    stack.pop();
                }
                stack.push(ExprToken::Op(op));
            }
            ExprToken::LParen => stack.push(token),
            ExprToken::RParen => loop {
                match stack.pop() {
                    Some(ExprToken::LParen) => break,
                    Some(t) => output.push(t),
                    None => return Err(incorrect(expression)),
                }
            },
        }
    }

    while let Some(t) = stack.pop() {
        if t == ExprToken::LParen {
            return Err(incorrect(expression));
        }
        output.push(t);
    }
    Ok(output)
}

fn apply(op: Op, l: i64, r: i64) -> Result<i64, MathError> {
    Ok(match op {
        Op::Mul => l.wrapping_mul(r),
        Op::Div => {
            if r == 0 {
                return Err(MathError::DivisionByZero);
            }
            l.wrapping_div(r)
        }
        Op::Mod => {
            if r == 0 {
                return Err(MathError::DivisionByZero);
            }
            l.wrapping_rem(r)
        }
        Op::Add => l.wrapping_add(r),
        Op::Sub => l.wrapping_sub(r),
        Op::Shl => l.wrapping_shl((r & 0x3f) as u32),
        Op::Shr => ((l as u64) >> (r & 0x3f)) as i64,
        Op::Lt => (l < r) as i64,
        Op::Le => (l <= r) as i64,
        Op::Gt => (l > r) as i64,
        Op::Ge => (l >= r) as i64,
        Op::Eq => (l == r) as i64,
        Op::Ne => (l != r) as i64,
        Op::BitAnd => l & r,
        Op::BitXor => l ^ r,
        Op::BitOr => l | r,
        Op::LogicAnd => (l != 0 && r != 0) as i64,
        Op::LogicOr => (l != 0 || r != 0) as i64,
        Op::Neg | Op::Pos | Op::BitNot | Op::LogicNot => unreachable!("unary op in binary position"),
    })
}

/// Evaluates an infix integer expression.
pub fn rpn(expression: &str, resolver: &dyn KeywordResolver) -> Result<i64, MathError> {
    let tokens = to_rpn(lex(expression)?, expression)?;
    let mut stack: Vec<i64> = Vec::new();

    for token in tokens {
        match token {
            ExprToken::Number(v) => stack.push(v),
            ExprToken::Ident(name) => {
                let v = resolver
                    .resolve(&name)
                    .ok_or(MathError::UnknownKeyword { name })?;
                stack.push(v);
            }
            ExprToken::Op(op) if op.is_unary() => {
                let v = stack.pop().ok_or_else(|| incorrect(expression))?;
                stack.push(match op {
                    Op::Neg => v.wrapping_neg(),
                    Op::BitNot => !v,
                    Op::LogicNot => (v == 0) as i64,
                    _ => v,
                });
            }
            ExprToken::Op(op) => {
                let r = stack.pop().ok_or_else(|| incorrect(expression))?;
                let l = stack.pop().ok_or_else(|| incorrect(expression))?;
                stack.push(apply(op, l, r)?);
            }
            ExprToken::LParen | ExprToken::RParen => return Err(incorrect(expression)),
        }
    }

    match stack.as_slice() {
        [v] => Ok(*v),
        _ => Err(incorrect(expression)),
    }
}
