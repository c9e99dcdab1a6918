use std::fmt;

use serde::Serialize;

use crate::error::LexerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenLocation {
    pub row: u32,
    pub column: u32,
}

impl TokenLocation {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for TokenLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenType {
    Number,
    FloatNumber,
    Quote,
    Keyword,
    Bracket,
    Operator,
    Eol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Parentheses,
    SquareBracket,
    CurlyBracket,
    /// Standalone prefix char directly followed by `[`.
    BracketPrefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumberFormat {
    Hex,
    Dec,
    Bin,
    Oct,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumberTokenValue {
    pub number: i64,
    pub byte_size: u8,
    pub format: NumberFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TokenValue {
    None,
    Number(NumberTokenValue),
    Float(f64),
}

/// Immutable lexical unit. Rewrites build new tokens instead of editing old ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub ty: TokenType,
    pub kind: Option<TokenKind>,
    pub text: String,
    pub loc: TokenLocation,
    pub value: TokenValue,
}

impl Token {
    pub fn new(ty: TokenType, kind: Option<TokenKind>, text: impl Into<String>, loc: TokenLocation) -> Self {
        Self {
            ty,
            kind,
            text: text.into(),
            loc,
            value: TokenValue::None,
        }
    }

    pub fn keyword(text: impl Into<String>, loc: TokenLocation) -> Self {
        Self::new(TokenType::Keyword, None, text, loc)
    }

    pub fn number(text: impl Into<String>, number: i64, format: NumberFormat, loc: TokenLocation) -> Self {
        Self {
            ty: TokenType::Number,
            kind: None,
            text: text.into(),
            loc,
            value: TokenValue::Number(NumberTokenValue {
                number,
                // no resize even if the declared size overflows later
                byte_size: round_to_power_of_two(number_byte_size(number.unsigned_abs())),
                format,
            }),
        }
    }

    pub fn lower_text(&self) -> String {
        self.text.to_lowercase()
    }

    pub fn is_eol(&self) -> bool {
        self.ty == TokenType::Eol
    }

    pub fn number_value(&self) -> Option<i64> {
        match self.value {
            TokenValue::Number(v) => Some(v.number),
            _ => None,
        }
    }

    pub fn float_value(&self) -> Option<f64> {
        match self.value {
            TokenValue::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Renders the token the way it would appear in source.
    pub fn to_source(&self) -> String {
        match self.ty {
            TokenType::Quote => {
                // the lexer never lets a string hold its own delimiter
                let quote = ['"', '\'', '`']
                    .into_iter()
                    .find(|q| !self.text.contains(*q))
                    .unwrap_or('`');
                format!("{quote}{}{quote}", self.text)
            }
            TokenType::Eol => "\n".to_string(),
            _ => self.text.clone(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_source())
    }
}

/// Joins tokens back into source text. Line terminators stay line terminators.
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut line_start = true;
    for t in tokens {
        if t.is_eol() {
            out.push('\n');
            line_start = true;
            continue;
        }
        if !line_start {
            out.push(' ');
        }
        out.push_str(&t.to_source());
        line_start = false;
    }
    out
}

/// Splits a token stream into lines, dropping the terminators and empty lines.
pub fn split_lines(tokens: &[Token]) -> Vec<Vec<Token>> {
    tokens
        .split(|t| t.is_eol())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_vec())
        .collect()
}

pub fn number_byte_size(num: u64) -> u8 {
    let bits = 64 - num.leading_zeros();
    (bits.max(1) as u8).div_ceil(8)
}

pub fn round_to_power_of_two(n: u8) -> u8 {
    n.max(1).next_power_of_two()
}

/// Parses assembler number literals, returns `None` for anything else.
pub fn parse_number_literal(text: &str) -> Option<(NumberFormat, i64)> {
    let t = text.replace('_', "");
    let lower = t.to_ascii_lowercase();
    if lower.is_empty() || !lower.as_bytes()[0].is_ascii_digit() {
        return None;
    }

    let radix_parse = |digits: &str, radix: u32| u64::from_str_radix(digits, radix).ok().map(|v| v as i64);

    if let Some(hex) = lower.strip_prefix("0x").or_else(|| lower.strip_prefix("0h")) {
        return radix_parse(hex, 16).map(|v| (NumberFormat::Hex, v));
    }
    if let Some(bin) = lower.strip_prefix("0b").or_else(|| lower.strip_prefix("0y")) {
        if let Some(v) = radix_parse(bin, 2) {
            return Some((NumberFormat::Bin, v));
        }
    }
    if let Some(oct) = lower.strip_prefix("0o").or_else(|| lower.strip_prefix("0q")) {
        return radix_parse(oct, 8).map(|v| (NumberFormat::Oct, v));
    }
    if let Some(hex) = lower.strip_suffix('h') {
        return radix_parse(hex, 16).map(|v| (NumberFormat::Hex, v));
    }
    if let Some(oct) = lower.strip_suffix('q').or_else(|| lower.strip_suffix('o')) {
        return radix_parse(oct, 8).map(|v| (NumberFormat::Oct, v));
    }
    if let Some(bin) = lower.strip_suffix('b').or_else(|| lower.strip_suffix('y')) {
        if let Some(v) = radix_parse(bin, 2) {
            return Some((NumberFormat::Bin, v));
        }
    }
    radix_parse(&lower, 10).map(|v| (NumberFormat::Dec, v))
}

fn parse_float_literal(text: &str) -> Option<f64> {
    let has_dot = text.contains('.');
    let has_exp = text.contains(['e', 'E']) && !text.starts_with("0x") && !text.ends_with(['h', 'H']);
    if !has_dot && !has_exp {
        return None;
    }
    text.parse::<f64>().ok()
}

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '.' | '$' | '?' | '@')
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '?' | '@' | '#')
}

/// Produces a flat token sequence from source text.
pub trait Tokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, LexerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct Lexer {
    pub prefix_char: char,
}

impl Default for Lexer {
    fn default() -> Self {
        Self { prefix_char: '%' }
    }
}

impl Lexer {
    pub fn new(prefix_char: char) -> Self {
        Self { prefix_char }
    }
}

impl Tokenizer for Lexer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, LexerError> {
        let chars: Vec<char> = text.chars().collect();
        let prefix = self.prefix_char;
        let mut tokens = Vec::new();
        let (mut row, mut col) = (1u32, 1u32);
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let loc = TokenLocation::new(row, col);
            let start = i;

            match c {
                '\n' => {
                    tokens.push(Token::new(TokenType::Eol, None, "\n", loc));
                    i += 1;
                    row += 1;
                    col = 1;
                    continue;
                }
                ';' => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                }
                c if c.is_whitespace() => i += 1,
                '"' | '\'' | '`' => {
                    let quote = c;
                    i += 1;
                    let content_start = i;
                    while i < chars.len() && chars[i] != quote && chars[i] != '\n' {
                        i += 1;
                    }
                    if i >= chars.len() || chars[i] != quote {
                        return Err(LexerError::UnterminatedString { loc });
                    }
                    let content: String = chars[content_start..i].iter().collect();
                    tokens.push(Token::new(TokenType::Quote, None, content, loc));
                    i += 1;
                }
                '(' | ')' | '[' | ']' | '{' | '}' => {
                    let kind = match c {
                        '(' | ')' => TokenKind::Parentheses,
                        '[' | ']' => TokenKind::SquareBracket,
                        _ => TokenKind::CurlyBracket,
                    };
                    tokens.push(Token::new(TokenType::Bracket, Some(kind), c.to_string(), loc));
                    i += 1;
                }
                c if c == prefix && chars.get(i + 1) == Some(&'[') => {
                    tokens.push(Token::new(
                        TokenType::Keyword,
                        Some(TokenKind::BracketPrefix),
                        prefix.to_string(),
                        loc,
                    ));
                    i += 1;
                }
                c if c == prefix && chars.get(i + 1).is_some_and(|&n| n == prefix || is_ident_char(n)) => {
                    i += 1;
                    while i < chars.len() && (chars[i] == prefix || is_ident_char(chars[i])) {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    tokens.push(Token::keyword(word, loc));
                }
                c if c.is_ascii_digit() => {
                    while i < chars.len() && (is_ident_char(chars[i]) || chars[i] == '.') {
                        // exponent sign: 1.5e-3
                        i += 1;
                        if matches!(chars.get(i), Some('+') | Some('-'))
                            && matches!(chars[i - 1], 'e' | 'E')
                            && chars[start..i].contains(&'.')
                        {
                            i += 1;
                        }
                    }
                    let word: String = chars[start..i].iter().collect();
                    if let Some(v) = parse_float_literal(&word) {
                        let mut t = Token::new(TokenType::FloatNumber, None, word, loc);
                        t.value = TokenValue::Float(v);
                        tokens.push(t);
                    } else if let Some((format, number)) = parse_number_literal(&word) {
                        tokens.push(Token::number(word, number, format, loc));
                    } else {
                        return Err(LexerError::InvalidNumber { text: word, loc });
                    }
                }
                c if is_ident_start(c) => {
                    while i < chars.len() && is_ident_char(chars[i]) {
                        i += 1;
                    }
                    // NAME%[expr] keeps the prefix glued to the name
                    if i < chars.len() && chars[i] == prefix && chars.get(i + 1) == Some(&'[') {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    tokens.push(Token::keyword(word, loc));
                }
                _ => {
                    let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                    let op = match two.as_str() {
                        "<<" | ">>" | "<=" | ">=" | "==" | "!=" | "&&" | "||" => two,
                        _ => c.to_string(),
                    };
                    i += op.chars().count();
                    tokens.push(Token::new(TokenType::Operator, None, op, loc));
                }
            }

            col += (i - start) as u32;
        }

        Ok(tokens)
    }
}

pub fn tokenize(text: &str) -> Result<Vec<Token>, LexerError> {
    Lexer::default().tokenize(text)
}
