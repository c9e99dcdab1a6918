//! Instruction-level parser: turns the macro-free token stream into an [`AstTree`].

pub mod ast;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::error::ParserError;
use crate::instructions::{self, is_mnemonic, is_register};
use crate::preprocessor::NodeLocation;
use crate::token::{join_tokens, split_lines, Token, TokenType, TokenValue};

pub use ast::{def_byte_size, AstDef, AstEqu, AstInstruction, AstLabel, AstNode, AstOrg, AstTimes, AstTree};

const TIMES: &str = "times";
const EQU: &str = "equ";
const ORG: &str = "org";

/// Names that cannot be used as labels or data operands.
pub fn is_reserved_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    is_mnemonic(&lower)
        || is_register(&lower)
        || def_byte_size(&lower).is_some()
        || matches!(lower.as_str(), TIMES | EQU | ORG)
}

fn is_instruction_beginning(token: &Token) -> bool {
    token.ty == TokenType::Keyword
        && (is_mnemonic(&token.text) || def_byte_size(&token.text).is_some() || token.lower_text() == TIMES)
}

fn is_keyword(token: Option<&Token>, name: &str) -> bool {
    token.is_some_and(|t| t.ty == TokenType::Keyword && t.lower_text() == name)
}

/// Splits operands on top-level commas. Empty groups are kept.
fn split_args(tokens: &[Token]) -> Vec<&[Token]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        match t.text.as_str() {
            "(" | "[" | "{" if t.ty == TokenType::Bracket => depth += 1,
            ")" | "]" | "}" if t.ty == TokenType::Bracket => depth -= 1,
            "," if depth == 0 && t.ty == TokenType::Operator => {
                groups.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&tokens[start..]);
    groups
}

fn unsupported(token: &Token) -> ParserError {
    ParserError::UnsupportedDefineToken {
        token: token.to_source(),
        loc: token.loc,
    }
}

/// Reduces one operand to a single token. Compound expressions become a
/// keyword token holding the expression text, evaluated later.
fn define_arg_token(group: &[Token], loc: NodeLocation) -> Result<Token, ParserError> {
    match group {
        [] => Err(ParserError::MissingDefineArgs { loc: loc.start }),
        [t] => match t.ty {
            TokenType::Number | TokenType::FloatNumber | TokenType::Quote => Ok(t.clone()),
            TokenType::Keyword if t.kind.is_none() && !is_reserved_name(&t.text) => Ok(t.clone()),
            _ => Err(unsupported(t)),
        },
        [sign, t] if sign.text == "-" && sign.ty == TokenType::Operator => match t.value {
            TokenValue::Float(v) => {
                let mut negated = Token::new(TokenType::FloatNumber, None, format!("-{}", t.text), sign.loc);
                negated.value = TokenValue::Float(-v);
                Ok(negated)
            }
            TokenValue::Number(v) => Ok(Token::number(
                format!("-{}", t.text),
                v.number.wrapping_neg(),
                v.format,
                sign.loc,
            )),
            TokenValue::None => expression_token(group),
        },
        _ => expression_token(group),
    }
}

fn expression_token(group: &[Token]) -> Result<Token, ParserError> {
    if let Some(bad) = group.iter().find(|t| {
        t.ty == TokenType::FloatNumber || t.is_eol() || (t.ty == TokenType::Keyword && is_reserved_name(&t.text))
    }) {
        return Err(unsupported(bad));
    }
    Ok(Token::keyword(join_tokens(group), group[0].loc))
}

pub struct AstParser {
    tokens: Vec<Token>,
    equ_names: HashSet<String>,
}

impl AstParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            equ_names: HashSet::new(),
        }
    }

    /// Parser over an isolated token window.
    pub fn fork(&self, tokens: Vec<Token>) -> Self {
        Self::new(tokens)
    }

    /// Parses every line, collecting all line errors instead of stopping at the first.
    pub fn get_tree(mut self) -> Result<AstTree, Vec<ParserError>> {
        let lines = split_lines(&self.tokens);
        let mut nodes = Vec::new();
        let mut errors = Vec::new();

        for line in &lines {
            if let Err(err) = self.parse_line(line, &mut nodes) {
                trace!(%err, "line rejected");
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(AstTree { nodes })
        } else {
            Err(errors)
        }
    }

    fn parse_line(&mut self, line: &[Token], nodes: &mut Vec<AstNode>) -> Result<(), ParserError> {
        let Some(first) = line.first() else {
            return Ok(());
        };
        let loc = NodeLocation::from_tokens(line);

        if first.text == "[" && is_keyword(line.get(1), ORG) {
            return self.parse_bracket_org(line, loc, nodes);
        }

        if first.ty != TokenType::Keyword || first.kind.is_some() {
            return Err(ParserError::UnexpectedToken {
                token: first.to_source(),
                loc: first.loc,
            });
        }

        let second = line.get(1);
        let lower = first.lower_text();

        // name: ... / name: equ ...
        if second.is_some_and(|t| t.text == ":" && t.ty == TokenType::Operator) {
            if is_keyword(line.get(2), EQU) {
                return self.parse_equ(first, &line[3..], loc, nodes);
            }
            nodes.push(AstNode::Label(self.label(first)?));
            return self.parse_line(&line[2..], nodes);
        }

        if lower == ORG {
            if line.len() < 2 {
                return Err(ParserError::UnexpectedToken {
                    token: first.text.clone(),
                    loc: first.loc,
                });
            }
            nodes.push(AstNode::Org(AstOrg {
                expression: line[1..].to_vec(),
                loc,
            }));
            return Ok(());
        }

        if lower == TIMES {
            nodes.push(AstNode::Times(self.parse_times(first, &line[1..], loc)?));
            return Ok(());
        }

        if let Some(byte_size) = def_byte_size(&lower) {
            nodes.push(AstNode::Def(parse_def(byte_size, &line[1..], loc)?));
            return Ok(());
        }

        if is_mnemonic(&lower) {
            nodes.push(AstNode::Instruction(parse_instruction(first, &line[1..], loc)?));
            return Ok(());
        }

        if is_keyword(second, EQU) {
            return self.parse_equ(first, &line[2..], loc, nodes);
        }

        // msg db "text"
        if let Some(byte_size) = second.filter(|t| t.ty == TokenType::Keyword).and_then(|t| def_byte_size(&t.text)) {
            nodes.push(AstNode::Label(self.label(first)?));
            nodes.push(AstNode::Def(parse_def(byte_size, &line[2..], loc)?));
            return Ok(());
        }

        Err(ParserError::UnknownInstruction {
            mnemonic: first.text.clone(),
            loc: first.loc,
        })
    }

    fn label(&self, token: &Token) -> Result<AstLabel, ParserError> {
        if is_reserved_name(&token.text) {
            return Err(ParserError::UsedReservedName {
                name: token.text.clone(),
                loc: token.loc,
            });
        }
        Ok(AstLabel {
            name: token.text.clone(),
            loc: NodeLocation::from_tokens(std::slice::from_ref(token)),
        })
    }

    fn parse_bracket_org(&self, line: &[Token], loc: NodeLocation, nodes: &mut Vec<AstNode>) -> Result<(), ParserError> {
        let close = line.iter().rposition(|t| t.text == "]").filter(|&c| c > 2);
        let Some(close) = close else {
            return Err(ParserError::UnexpectedToken {
                token: join_tokens(line),
                loc: loc.start,
            });
        };
        if let Some(trailing) = line.get(close + 1) {
            return Err(ParserError::UnexpectedToken {
                token: trailing.to_source(),
                loc: trailing.loc,
            });
        }
        nodes.push(AstNode::Org(AstOrg {
            expression: line[2..close].to_vec(),
            loc,
        }));
        Ok(())
    }

    fn parse_equ(
        &mut self,
        name: &Token,
        expression: &[Token],
        loc: NodeLocation,
        nodes: &mut Vec<AstNode>,
    ) -> Result<(), ParserError> {
        if expression.is_empty() {
            return Err(ParserError::IncorrectEquArgsCount { loc: name.loc });
        }
        self.label(name)?;
        if !self.equ_names.insert(name.text.clone()) {
            return Err(ParserError::EquAlreadyDefined {
                name: name.text.clone(),
                loc: name.loc,
            });
        }
        nodes.push(AstNode::Equ(AstEqu {
            name: name.text.clone(),
            expression: expression.to_vec(),
            loc,
        }));
        Ok(())
    }

    /// `times <expr> <instruction>`: everything before the first instruction
    /// keyword is the count, the rest is parsed by a forked parser.
    fn parse_times(&self, token: &Token, rest: &[Token], loc: NodeLocation) -> Result<AstTimes, ParserError> {
        let split = rest.iter().position(is_instruction_beginning).unwrap_or(rest.len());
        let (expression, repeated) = rest.split_at(split);

        if expression.is_empty() {
            return Err(ParserError::IncorrectTimesArgsCount { loc: token.loc });
        }
        if repeated.is_empty() {
            return Err(ParserError::MissingTimesRepeatedInstruction { loc: token.loc });
        }

        debug!(expression = %join_tokens(expression), "forking parser for repeated instruction");
        let tree = self
            .fork(repeated.to_vec())
            .get_tree()
            .map_err(|errors| {
                errors.into_iter().next().unwrap_or_else(|| ParserError::UnableParseRepeatedInstruction {
                    expression: join_tokens(repeated),
                    loc: token.loc,
                })
            })?;

        if tree.is_empty() {
            return Err(ParserError::UnableParseRepeatedInstruction {
                expression: join_tokens(repeated),
                loc: token.loc,
            });
        }

        Ok(AstTimes {
            expression: expression.to_vec(),
            repeated: tree,
            loc,
        })
    }
}

fn parse_def(byte_size: usize, args: &[Token], loc: NodeLocation) -> Result<AstDef, ParserError> {
    if args.is_empty() {
        return Err(ParserError::MissingDefineArgs { loc: loc.start });
    }
    let args = split_args(args)
        .into_iter()
        .map(|group| define_arg_token(group, loc))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AstDef { byte_size, args, loc })
}

fn parse_instruction(mnemonic: &Token, args: &[Token], loc: NodeLocation) -> Result<AstInstruction, ParserError> {
    let groups = split_args(args);
    let desc = instructions::lookup(&mnemonic.text, groups.len()).ok_or_else(|| {
        ParserError::IncorrectInstructionArgs {
            mnemonic: mnemonic.lower_text(),
            expected: instructions::forms(&mnemonic.text)
                .next()
                .map_or(0, |d| d.operand.args_count()),
            found: groups.len(),
            loc: mnemonic.loc,
        }
    })?;

    let args = groups
        .into_iter()
        .map(|group| match group {
            // character immediates go through the expression evaluator
            [t] if t.ty == TokenType::Quote => Ok(Token::keyword(t.to_source(), t.loc)),
            [t] if t.ty == TokenType::FloatNumber => Err(ParserError::UnexpectedToken {
                token: t.text.clone(),
                loc: t.loc,
            }),
            _ => define_arg_token(group, loc),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AstInstruction { desc, args, loc })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tokenize;

    fn parse(src: &str) -> Result<AstTree, Vec<ParserError>> {
        AstParser::new(tokenize(src).unwrap()).get_tree()
    }

    fn first_error(src: &str) -> ParserError {
        parse(src).unwrap_err().remove(0)
    }

    #[test]
    fn labels_and_defs() {
        let tree = parse("foo: db 0x41, 'AB'\nmsg dw 1, bar + 2\n").unwrap();
        let shown: Vec<String> = tree.nodes.iter().map(|n| n.to_string()).collect();
        assert_eq!(shown, vec!["foo:", "db 0x41, \"AB\"", "msg:", "dw 1, bar + 2"]);
    }

    #[test]
    fn negative_literals_fold() {
        let tree = parse("db -1\ndd -1.5\n").unwrap();
        match &tree.nodes[0] {
            AstNode::Def(def) => assert_eq!(def.args[0].number_value(), Some(-1)),
            other => panic!("{other:?}"),
        }
        match &tree.nodes[1] {
            AstNode::Def(def) => assert_eq!(def.args[0].float_value(), Some(-1.5)),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn times_forks_single_instruction() {
        let tree = parse("times 510 - ($ - $$) db 0\n").unwrap();
        match &tree.nodes[0] {
            AstNode::Times(times) => {
                assert_eq!(join_tokens(&times.expression), "510 - ( $ - $$ )");
                assert_eq!(times.repeated.nodes.len(), 1);
                assert!(matches!(times.repeated.nodes[0], AstNode::Def(_)));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn times_errors() {
        assert!(matches!(first_error("times nop"), ParserError::IncorrectTimesArgsCount { .. }));
        assert!(matches!(first_error("times 4"), ParserError::MissingTimesRepeatedInstruction { .. }));
        assert!(matches!(first_error("times 2 db nop"), ParserError::UnsupportedDefineToken { .. }));
    }

    #[test]
    fn equ_rules() {
        let tree = parse("a equ 1\nb: equ a + 1\n").unwrap();
        assert_eq!(tree.nodes.len(), 2);
        assert!(matches!(first_error("test3 equ"), ParserError::IncorrectEquArgsCount { .. }));
        assert!(matches!(
            first_error("x equ 1\nx equ 2"),
            ParserError::EquAlreadyDefined { .. }
        ));
    }

    #[test]
    fn instructions_and_org() {
        let tree = parse("[org 0x7C00]\nint 0x10\nret\nret 4\n").unwrap();
        assert!(matches!(tree.nodes[0], AstNode::Org(_)));
        match &tree.nodes[1] {
            AstNode::Instruction(i) => {
                assert_eq!(i.desc.opcode, &[0xCD]);
                assert_eq!(i.args.len(), 1);
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(first_error("nop 1"), ParserError::IncorrectInstructionArgs { .. }));
        assert!(matches!(first_error("frobnicate 1"), ParserError::UnknownInstruction { .. }));
        assert!(matches!(first_error("nop: db 1"), ParserError::UsedReservedName { .. }));
    }

    #[test]
    fn collects_every_line_error() {
        let errors = parse("bogus\ndb\nnop\nfrob").unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
