//! Groups preprocessor lines into a block-structured tree.

use serde::Serialize;

use crate::error::PreprocessorError;
use crate::token::{split_lines, Token, TokenLocation, TokenType};

/// Source range covered by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeLocation {
    pub start: TokenLocation,
    pub end: TokenLocation,
}

impl NodeLocation {
    pub fn from_tokens(tokens: &[Token]) -> Self {
        Self {
            start: tokens.first().map(|t| t.loc).unwrap_or_default(),
            end: tokens.last().map(|t| t.loc).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxLine {
    pub tokens: Vec<Token>,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefineNode {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Token>,
    pub case_sensitive: bool,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroNode {
    pub name: String,
    pub args_count: usize,
    pub body: Vec<PreprocessorNode>,
    pub case_sensitive: bool,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IfCondition {
    Expression(Vec<Token>),
    Defined { name: String, negate: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub condition: IfCondition,
    pub body: Vec<PreprocessorNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub branches: Vec<IfBranch>,
    pub otherwise: Option<Vec<PreprocessorNode>>,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepNode {
    pub count: Vec<Token>,
    pub body: Vec<PreprocessorNode>,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessorNode {
    Stmt(Vec<PreprocessorNode>),
    SyntaxLine(SyntaxLine),
    Define(DefineNode),
    Undef { name: String, loc: NodeLocation },
    Assign { name: String, expression: Vec<Token>, loc: NodeLocation },
    Macro(MacroNode),
    If(IfNode),
    Rep(RepNode),
    Error { message: Vec<Token>, loc: NodeLocation },
}

impl PreprocessorNode {
    pub fn children(&self) -> &[PreprocessorNode] {
        match self {
            PreprocessorNode::Stmt(children) => children,
            _ => std::slice::from_ref(self),
        }
    }
}

const BLOCK_ENDS: &[&str] = &["endmacro", "endif", "else", "elif", "endrep"];

struct Directive<'a> {
    name: String,
    head: &'a Token,
    args: &'a [Token],
}

pub struct PreprocessorGrammar {
    prefix_char: char,
    lines: Vec<Vec<Token>>,
    pos: usize,
}

impl PreprocessorGrammar {
    pub fn new(prefix_char: char, tokens: &[Token]) -> Self {
        Self {
            prefix_char,
            lines: split_lines(tokens),
            pos: 0,
        }
    }

    /// Parses the whole input into a root `Stmt` node.
    pub fn process(mut self) -> Result<PreprocessorNode, PreprocessorError> {
        let (nodes, end) = self.parse_block(&[])?;
        if let Some((name, loc)) = end {
            return Err(PreprocessorError::UnexpectedDirective {
                directive: format!("{}{}", self.prefix_char, name),
                loc,
            });
        }
        Ok(PreprocessorNode::Stmt(nodes))
    }

    fn directive<'a>(&self, line: &'a [Token]) -> Option<Directive<'a>> {
        let head = line.first()?;
        if head.ty != TokenType::Keyword || head.kind.is_some() {
            return None;
        }
        let name = head.text.strip_prefix(self.prefix_char)?;
        // %1, %%label, %0 are substitutions, not directives
        if !name.chars().next()?.is_ascii_alphabetic() {
            return None;
        }
        Some(Directive {
            name: name.to_ascii_lowercase(),
            head,
            args: &line[1..],
        })
    }

    fn missing(&self, d: &Directive<'_>) -> PreprocessorError {
        PreprocessorError::MissingDirectiveArgument {
            directive: d.head.text.clone(),
            loc: d.head.loc,
        }
    }

    /// Parses lines until one of `terminators` (returned with its location) or EOF.
    fn parse_block(
        &mut self,
        terminators: &[&str],
    ) -> Result<(Vec<PreprocessorNode>, Option<(String, TokenLocation)>), PreprocessorError> {
        let mut nodes = Vec::new();

        while self.pos < self.lines.len() {
            let line = self.lines[self.pos].clone();
            self.pos += 1;

            let Some(d) = self.directive(&line) else {
                nodes.push(PreprocessorNode::SyntaxLine(SyntaxLine {
                    loc: NodeLocation::from_tokens(&line),
                    tokens: line,
                }));
                continue;
            };

            if BLOCK_ENDS.contains(&d.name.as_str()) {
                if terminators.contains(&d.name.as_str()) {
                    // rewind so the caller can read the terminator arguments
                    self.pos -= 1;
                    return Ok((nodes, Some((d.name, d.head.loc))));
                }
                return Err(PreprocessorError::UnexpectedDirective {
                    directive: d.head.text.clone(),
                    loc: d.head.loc,
                });
            }

            let loc = NodeLocation::from_tokens(&line);
            let node = match d.name.as_str() {
                "define" | "idefine" => self.parse_define(&d, loc)?,
                "undef" => {
                    let name = d.args.first().ok_or_else(|| self.missing(&d))?;
                    PreprocessorNode::Undef {
                        name: name.text.clone(),
                        loc,
                    }
                }
                "assign" => {
                    let (name, expression) = d.args.split_first().ok_or_else(|| self.missing(&d))?;
                    if expression.is_empty() {
                        return Err(self.missing(&d));
                    }
                    PreprocessorNode::Assign {
                        name: name.text.clone(),
                        expression: expression.to_vec(),
                        loc,
                    }
                }
                "macro" | "imacro" => self.parse_macro(&d, loc)?,
                "if" | "ifdef" | "ifndef" => self.parse_if(&d, loc)?,
                "rep" => {
                    if d.args.is_empty() {
                        return Err(self.missing(&d));
                    }
                    let (body, _) = self.parse_terminated(&d, &["endrep"])?;
                    self.pos += 1;
                    PreprocessorNode::Rep(RepNode {
                        count: d.args.to_vec(),
                        body,
                        loc,
                    })
                }
                "error" => PreprocessorNode::Error {
                    message: d.args.to_vec(),
                    loc,
                },
                _ => {
                    return Err(PreprocessorError::UnknownDirective {
                        directive: d.head.text.clone(),
                        loc: d.head.loc,
                    })
                }
            };
            nodes.push(node);
        }

        Ok((nodes, None))
    }

    /// Parses a nested block that must end with one of `terminators`.
    fn parse_terminated(
        &mut self,
        opener: &Directive<'_>,
        terminators: &[&str],
    ) -> Result<(Vec<PreprocessorNode>, String), PreprocessorError> {
        let (body, end) = self.parse_block(terminators)?;
        match end {
            Some((name, _)) => Ok((body, name)),
            None => Err(PreprocessorError::UnterminatedBlock {
                directive: opener.head.text.clone(),
                loc: opener.head.loc,
            }),
        }
    }

    fn parse_define(&self, d: &Directive<'_>, loc: NodeLocation) -> Result<PreprocessorNode, PreprocessorError> {
        let name = d.args.first().ok_or_else(|| self.missing(d))?;
        let mut rest = &d.args[1..];
        let mut params = Vec::new();

        // `NAME(` without whitespace opens a parameter list
        let glued_paren = rest.first().is_some_and(|t| {
            t.text == "("
                && t.loc.row == name.loc.row
                && t.loc.column == name.loc.column + name.text.chars().count() as u32
        });
        if glued_paren {
            let close = rest
                .iter()
                .position(|t| t.text == ")")
                .ok_or_else(|| self.missing(d))?;
            params = rest[1..close]
                .iter()
                .filter(|t| t.text != ",")
                .map(|t| t.text.clone())
                .collect();
            rest = &rest[close + 1..];
        }

        Ok(PreprocessorNode::Define(DefineNode {
            name: name.text.clone(),
            params,
            body: rest.to_vec(),
            case_sensitive: d.name == "define",
            loc,
        }))
    }

    fn parse_macro(&mut self, d: &Directive<'_>, loc: NodeLocation) -> Result<PreprocessorNode, PreprocessorError> {
        let name = d.args.first().ok_or_else(|| self.missing(d))?;
        let args_count = match d.args.get(1) {
            Some(t) => t.number_value().ok_or_else(|| self.missing(d))? as usize,
            None => 0,
        };
        let (body, _) = self.parse_terminated(d, &["endmacro"])?;
        self.pos += 1;

        Ok(PreprocessorNode::Macro(MacroNode {
            name: name.text.clone(),
            args_count,
            body,
            case_sensitive: d.name == "macro",
            loc,
        }))
    }

    fn condition(&self, d: &Directive<'_>) -> Result<IfCondition, PreprocessorError> {
        match d.name.as_str() {
            "ifdef" | "ifndef" => {
                let name = d.args.first().ok_or_else(|| self.missing(d))?;
                Ok(IfCondition::Defined {
                    name: name.text.clone(),
                    negate: d.name == "ifndef",
                })
            }
            _ => {
                if d.args.is_empty() {
                    return Err(self.missing(d));
                }
                Ok(IfCondition::Expression(d.args.to_vec()))
            }
        }
    }

    fn parse_if(&mut self, d: &Directive<'_>, loc: NodeLocation) -> Result<PreprocessorNode, PreprocessorError> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        let mut condition = self.condition(d)?;

        loop {
            let (body, end) = self.parse_terminated(d, &["elif", "else", "endif"])?;
            let terminator = self.lines[self.pos].clone();
            self.pos += 1;
            branches.push(IfBranch { condition, body });

            match end.as_str() {
                "elif" => {
                    let elif = self.directive(&terminator).ok_or_else(|| self.missing(d))?;
                    condition = self.condition(&elif)?;
                }
                "else" => {
                    let (body, _) = self.parse_terminated(d, &["endif"])?;
                    self.pos += 1;
                    otherwise = Some(body);
                    break;
                }
                _ => break,
            }
        }

        Ok(PreprocessorNode::If(IfNode {
            branches,
            otherwise,
            loc,
        }))
    }
}
