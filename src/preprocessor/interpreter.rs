//! Executes the preprocessor tree and emits macro-free source text.
//!
//! Execution runs in two phases. The first phase runs every root node in
//! source order; a root `%if` whose condition names a symbol nobody has
//! bound yet is queued instead. The second phase replays the queued nodes
//! in source order with [`PreprocessorInterpreter::second_pass_exec`] set,
//! where an unknown symbol is a hard error. Plain root lines are expanded
//! only after both phases, so they see every root definition.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::AssemblerConfig;
use crate::error::{MathError, PreprocessorError};
use crate::expr::rpn;
use crate::token::{join_tokens, Lexer, Token, TokenKind, TokenLocation, TokenType, Tokenizer};

use super::grammar::{IfCondition, IfNode, PreprocessorGrammar, PreprocessorNode};
use super::scope::{Callable, CallableBody, InterpreterValue, PreprocessorScope, ScopeId};

type Result<T> = std::result::Result<T, PreprocessorError>;

enum Slot {
    Line(usize),
    Lines(Vec<String>),
    Deferred(usize),
}

pub struct PreprocessorInterpreter {
    config: AssemblerConfig,
    lexer: Lexer,
    scopes: Vec<PreprocessorScope>,
    /// `equ` constants, consulted after every scoped binding.
    loose_variables: HashMap<String, i64>,
    second_pass_exec: bool,
    second_pass_nodes: Vec<usize>,
    next_scope_id: u64,
    call_depth: usize,
    rep_iterations: usize,
    pre_executed: bool,
}

impl Default for PreprocessorInterpreter {
    fn default() -> Self {
        Self::new(AssemblerConfig::default())
    }
}

impl PreprocessorInterpreter {
    pub fn new(config: AssemblerConfig) -> Self {
        let lexer = Lexer::new(config.prefix_char);
        Self {
            config,
            lexer,
            scopes: vec![PreprocessorScope::new(ScopeId(0))],
            loose_variables: HashMap::new(),
            second_pass_exec: false,
            second_pass_nodes: Vec::new(),
            next_scope_id: 1,
            call_depth: 0,
            rep_iterations: 0,
            pre_executed: false,
        }
    }

    pub fn second_pass_exec(&self) -> bool {
        self.second_pass_exec
    }

    pub fn root_scope(&self) -> &PreprocessorScope {
        &self.scopes[0]
    }

    pub fn current_scope(&self) -> &PreprocessorScope {
        // the root scope is never popped
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut PreprocessorScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Drops every binding and definition.
    pub fn clear(&mut self) {
        self.scopes = vec![PreprocessorScope::new(ScopeId(0))];
        self.loose_variables.clear();
        self.second_pass_nodes.clear();
        self.second_pass_exec = false;
        self.call_depth = 0;
        self.rep_iterations = 0;
        self.pre_executed = false;
    }

    /// Parses `code` into a preprocessor tree and executes it.
    pub fn exec(&mut self, code: &str) -> Result<(String, PreprocessorNode)> {
        if !self.pre_executed {
            self.pre_executed = true;
            if let Some(pre) = self.config.pre_exec.clone() {
                debug!("running pre-exec source");
                let stmt = self.parse(&pre)?;
                self.exec_tree(&stmt)?;
            }
        }

        let stmt = self.parse(code)?;
        let text = self.exec_tree(&stmt)?;
        Ok((text, stmt))
    }

    fn parse(&self, code: &str) -> Result<PreprocessorNode> {
        let tokens = self.lexer.tokenize(code)?;
        PreprocessorGrammar::new(self.config.prefix_char, &tokens).process()
    }

    pub fn exec_tree(&mut self, ast: &PreprocessorNode) -> Result<String> {
        let children = ast.children();
        let mut slots = Vec::with_capacity(children.len());

        // first phase
        self.second_pass_exec = false;
        self.second_pass_nodes.clear();
        self.rep_iterations = 0;

        for (idx, node) in children.iter().enumerate() {
            match node {
                PreprocessorNode::SyntaxLine(line) => {
                    self.scan_equ(&line.tokens);
                    slots.push(Slot::Line(idx));
                }
                PreprocessorNode::If(if_node) => match self.select_if_branch(if_node) {
                    Ok(body) => slots.push(Slot::Lines(self.exec_nodes(body)?)),
                    Err(err) if is_forward_reference(&err) => {
                        debug!(row = if_node.loc.start.row, "deferring %if to second pass: {err}");
                        self.second_pass_nodes.push(idx);
                        slots.push(Slot::Deferred(idx));
                    }
                    Err(err) => return Err(err),
                },
                _ => slots.push(Slot::Lines(self.exec_node(node)?)),
            }
        }

        // second phase
        let mut deferred_output = HashMap::new();
        if !self.second_pass_nodes.is_empty() {
            self.second_pass_exec = true;
            let queued = std::mem::take(&mut self.second_pass_nodes);
            debug!(count = queued.len(), "second pass");
            for idx in queued {
                let lines = self.exec_node(&children[idx])?;
                deferred_output.insert(idx, lines);
            }
        }

        let mut acc = String::new();
        for slot in slots {
            let lines = match slot {
                Slot::Line(idx) => match &children[idx] {
                    PreprocessorNode::SyntaxLine(line) => vec![self.expand_line(&line.tokens)?],
                    _ => Vec::new(),
                },
                Slot::Lines(lines) => lines,
                Slot::Deferred(idx) => deferred_output.remove(&idx).unwrap_or_default(),
            };
            for line in lines.iter().filter(|l| !l.trim().is_empty()) {
                acc.push_str(line);
                acc.push('\n');
            }
        }

        self.second_pass_exec = false;
        Ok(acc)
    }

    /// Pushes a scope holding `variables`, runs `body` and pops the scope again,
    /// whether `body` succeeded or not. `loc` tags binding conflicts.
    pub fn enter_scope<R>(
        &mut self,
        variables: Vec<(String, InterpreterValue)>,
        loc: TokenLocation,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let id = ScopeId(self.next_scope_id);
        self.next_scope_id += 1;
        self.scopes.push(PreprocessorScope::new(id));
        trace!(scope = %id, depth = self.scopes.len(), "enter scope");

        let bound = variables
            .into_iter()
            .try_for_each(|(name, value)| self.set_variable(&name, value, loc));
        let result = bound.and_then(|_| body(self));

        self.scopes.pop();
        trace!(scope = %id, "leave scope");
        result
    }

    /// Declares a callable in the root scope.
    pub fn define_runtime_callable(&mut self, callable: Callable) -> Result<()> {
        let (table, key) = self.scopes[0]
            .callables
            .slot_mut(&callable.name, callable.case_sensitive);
        let existing = table.get(&key).map(Vec::as_slice).unwrap_or_default();
        let duplicated = existing.iter().any(|c| c.args_count == callable.args_count);

        if duplicated || (!existing.is_empty() && callable.args_count == 0) {
            if duplicated && callable.args_count == 0 && existing.len() == 1 {
                // a lone inline macro may be redefined
                table.remove(&key);
            } else {
                return Err(PreprocessorError::MacroAlreadyExists {
                    name: callable.name.clone(),
                    loc: callable.loc,
                });
            }
        }

        debug!(name = %callable.name, args = callable.args_count, "define callable");
        let (table, key) = self.scopes[0]
            .callables
            .slot_mut(&callable.name, callable.case_sensitive);
        table.entry(key).or_default().push(Rc::new(callable));
        Ok(())
    }

    pub fn undef_runtime_callable(&mut self, name: &str, case_sensitive: bool) {
        let callables = &mut self.scopes[0].callables;
        callables.non_sensitive.remove(&name.to_lowercase());
        if case_sensitive {
            callables.sensitive.remove(name);
        }
    }

    /// Case-sensitive overloads first, then case-insensitive ones.
    pub fn get_callables(&self, name: &str) -> Vec<Rc<Callable>> {
        self.root_scope().callables.lookup(name)
    }

    /// Walks from the innermost scope to the root.
    pub fn get_variable(&self, name: &str) -> Option<&InterpreterValue> {
        self.scopes.iter().rev().find_map(|s| s.variables.get(name))
    }

    /// Binds `name` in the current scope, failing if it is already bound there.
    pub fn set_variable(&mut self, name: &str, value: InterpreterValue, loc: TokenLocation) -> Result<()> {
        let scope = self.current_scope_mut();
        if scope.variables.contains_key(name) {
            return Err(PreprocessorError::VariableAlreadyExistsInCurrentScope {
                name: name.to_string(),
                loc,
            });
        }
        scope.variables.insert(name.to_string(), value);
        Ok(())
    }

    /// `%assign` semantics: overwrite where bound, else bind in the current scope.
    pub fn assign_variable(&mut self, name: &str, value: InterpreterValue) {
        let scope = self
            .scopes
            .iter_mut()
            .rev()
            .find(|s| s.variables.contains_key(name));
        match scope {
            Some(scope) => {
                scope.variables.insert(name.to_string(), value);
            }
            None => {
                self.current_scope_mut().variables.insert(name.to_string(), value);
            }
        }
    }

    pub fn set_loose_variable(&mut self, name: &str, value: i64) {
        self.loose_variables.insert(name.to_string(), value);
    }

    /// Numeric value of a name for expressions: scoped bindings first, `equ` fallback.
    pub fn resolve_keyword(&self, name: &str) -> Option<i64> {
        match self.get_variable(name) {
            Some(InterpreterValue::Text(text)) => rpn(text, &|n: &str| self.loose_variables.get(n).copied()).ok(),
            Some(value) => value.as_number(),
            None => self.loose_variables.get(name).copied(),
        }
    }

    fn is_defined(&self, name: &str) -> bool {
        !self.get_callables(name).is_empty()
            || self.get_variable(name).is_some()
            || self.loose_variables.contains_key(name)
    }

    /// One left-to-right substitution sweep. Returns whether anything changed.
    pub fn remove_macros_from_tokens(&mut self, tokens: &[Token]) -> Result<(bool, Vec<Token>)> {
        let prefix = self.config.prefix_char;
        let mut work = tokens.to_vec();
        let mut changed = false;
        let mut in_inline_expression = false;
        let mut i = 0;

        while i < work.len() {
            let token = work[i].clone();
            let loc = token.loc;
            let next_opens_square = work.get(i + 1).is_some_and(|t| t.text == "[");

            // NAME%[expr]: split into NAME and a standalone prefix
            if token.ty == TokenType::Keyword
                && token.text.chars().count() > 1
                && token.text.ends_with(prefix)
                && next_opens_square
            {
                let name = &token.text[..token.text.len() - prefix.len_utf8()];
                let split = [
                    Token::keyword(name, loc),
                    Token::new(TokenType::Keyword, Some(TokenKind::BracketPrefix), prefix.to_string(), loc),
                ];
                work.splice(i..=i, split);
                in_inline_expression = true;
                changed = true;
                i += 1;
                continue;
            }

            let substitutable = token.ty == TokenType::Keyword
                && matches!(token.kind, None | Some(TokenKind::BracketPrefix));
            if !substitutable {
                in_inline_expression = false;
                i += 1;
                continue;
            }

            if let Some(value) = self.get_variable(&token.text) {
                let text = value.to_string();
                if text != token.text {
                    work[i] = Token::keyword(text, loc);
                    changed = true;
                }
                i += 1;
                continue;
            }

            if let Some(rest) = token.text.strip_prefix(prefix) {
                if let Some(local) = rest.strip_prefix(prefix) {
                    // %%name: scope-local name
                    work[i] = Token::keyword(format!("{}_{}", self.current_scope().id, local), loc);
                    changed = true;
                } else if next_opens_square {
                    if let Some((content, end)) = extract_nestable(&work, i + 1, "[", "]") {
                        let content = content.to_vec();
                        let value = self.eval_tokens_expression(&content, loc)?;
                        if in_inline_expression && i > 0 {
                            let merged = Token::keyword(format!("{}{}", work[i - 1].text, value), work[i - 1].loc);
                            work.splice(i - 1..end, [merged]);
                            i -= 1;
                        } else {
                            work.splice(i..end, [Token::keyword(value.to_string(), loc)]);
                        }
                        changed = true;
                    }
                }
                in_inline_expression = false;
                i += 1;
                continue;
            }

            let callables = self.get_callables(&token.text);
            if !callables.is_empty() {
                let line_start = i == 0 || work[i - 1].is_eol();
                let inline = !line_start || !callables.iter().any(|c| c.args_count > 0);
                let bracket_call = work.get(i + 1).is_some_and(|t| t.text == "(");

                let fetched = if !inline || bracket_call {
                    fetch_runtime_call_args_list(&work, i + 1, bracket_call)
                } else {
                    Some((Vec::new(), i + 1))
                };

                let mut call = None;
                if let Some((raw_args, end)) = fetched {
                    let args = raw_args
                        .iter()
                        .map(|arg| self.remove_macros_from_tokens(arg).map(|(_, t)| t))
                        .collect::<Result<Vec<_>>>()?;
                    call = callables
                        .iter()
                        .find(|c| c.args_count == args.len())
                        .map(|c| (Rc::clone(c), args, end));
                }
                // `NAME (expr)` with only a plain overload: NAME alone is the call
                if call.is_none() && bracket_call {
                    call = callables
                        .iter()
                        .find(|c| c.args_count == 0)
                        .map(|c| (Rc::clone(c), Vec::new(), i + 1));
                }

                match call {
                    Some((callable, args, end)) => {
                        let result = self.runtime_call(&callable, &args, loc)?;
                        let mut replacement = self.lexer.tokenize(&result)?;
                        for t in &mut replacement {
                            t.loc = loc;
                        }
                        let inserted = replacement.len();
                        work.splice(i..end, replacement);
                        changed = true;
                        in_inline_expression = false;
                        i += inserted;
                        continue;
                    }
                    None => trace!(name = %token.text, "no overload matches"),
                }
            }

            in_inline_expression = false;
            i += 1;
        }

        Ok((changed, work))
    }

    /// Repeats [`Self::remove_macros_from_tokens`] until nothing changes.
    pub fn expand_tokens(&mut self, tokens: &[Token], loc: TokenLocation) -> Result<Vec<Token>> {
        let mut current = tokens.to_vec();
        for _ in 0..self.config.max_expansion_iterations {
            let (changed, next) = self.remove_macros_from_tokens(&current)?;
            if !changed {
                return Ok(next);
            }
            current = next;
        }
        Err(PreprocessorError::ExpansionLimitExceeded {
            limit: self.config.max_expansion_iterations,
            loc,
        })
    }

    fn expand_line(&mut self, tokens: &[Token]) -> Result<String> {
        let loc = tokens.first().map(|t| t.loc).unwrap_or_default();
        let expanded = self.expand_tokens(tokens, loc)?;
        Ok(join_tokens(&expanded))
    }

    pub fn eval_tokens_expression(&mut self, tokens: &[Token], loc: TokenLocation) -> Result<i64> {
        let expanded = self.expand_tokens(tokens, loc)?;
        let expression = join_tokens(&expanded);
        let value = rpn(&expression, &|name: &str| self.resolve_keyword(name));
        value.map_err(|source| PreprocessorError::IncorrectMathExpression { expression, source, loc })
    }

    fn runtime_call(&mut self, callable: &Callable, args: &[Vec<Token>], loc: TokenLocation) -> Result<String> {
        if self.call_depth >= self.config.max_recursion_depth {
            return Err(PreprocessorError::RecursionLimitExceeded {
                limit: self.config.max_recursion_depth,
                loc,
            });
        }

        trace!(name = %callable.name, args = args.len(), depth = self.call_depth, "call");
        self.call_depth += 1;
        let result = match &callable.body {
            CallableBody::Inline { params, tokens } => {
                let bindings = params
                    .iter()
                    .zip(args)
                    .map(|(p, a)| (p.clone(), InterpreterValue::Text(join_tokens(a))))
                    .collect();
                self.enter_scope(bindings, loc, |this| {
                    let expanded = this.expand_tokens(tokens, loc)?;
                    Ok(join_tokens(&expanded))
                })
            }
            CallableBody::MultiLine(nodes) => {
                let prefix = self.config.prefix_char;
                let mut bindings = vec![(format!("{prefix}0"), InterpreterValue::Number(args.len() as i64))];
                bindings.extend(
                    args.iter()
                        .enumerate()
                        .map(|(n, a)| (format!("{prefix}{}", n + 1), InterpreterValue::Text(join_tokens(a)))),
                );
                self.enter_scope(bindings, loc, |this| Ok(this.exec_nodes(nodes)?.join("\n")))
            }
        };
        self.call_depth -= 1;
        result
    }

    fn select_if_branch<'a>(&mut self, node: &'a IfNode) -> Result<&'a [PreprocessorNode]> {
        for branch in &node.branches {
            let taken = match &branch.condition {
                IfCondition::Defined { name, negate } => self.is_defined(name) != *negate,
                IfCondition::Expression(tokens) => {
                    let loc = tokens.first().map(|t| t.loc).unwrap_or(node.loc.start);
                    self.eval_tokens_expression(tokens, loc)? != 0
                }
            };
            if taken {
                return Ok(&branch.body);
            }
        }
        Ok(node.otherwise.as_deref().unwrap_or_default())
    }

    fn exec_nodes(&mut self, nodes: &[PreprocessorNode]) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for node in nodes {
            lines.extend(self.exec_node(node)?);
        }
        Ok(lines)
    }

    fn exec_node(&mut self, node: &PreprocessorNode) -> Result<Vec<String>> {
        match node {
            PreprocessorNode::Stmt(children) => self.exec_nodes(children),
            PreprocessorNode::SyntaxLine(line) => {
                let text = self.expand_line(&line.tokens)?;
                let expanded = self.lexer.tokenize(&text)?;
                self.scan_equ(&expanded);
                Ok(vec![text])
            }
            PreprocessorNode::Define(define) => {
                self.define_runtime_callable(Callable {
                    name: self.param_text(&define.name),
                    case_sensitive: define.case_sensitive,
                    args_count: define.params.len(),
                    body: CallableBody::Inline {
                        params: define.params.clone(),
                        tokens: self.substitute_params(&define.body),
                    },
                    loc: define.loc.start,
                })?;
                Ok(Vec::new())
            }
            PreprocessorNode::Undef { name, .. } => {
                self.undef_runtime_callable(name, true);
                Ok(Vec::new())
            }
            PreprocessorNode::Assign { name, expression, loc } => {
                let value = self.eval_tokens_expression(expression, loc.start)?;
                let name = self.param_text(name);
                self.assign_variable(&name, InterpreterValue::Number(value));
                Ok(Vec::new())
            }
            PreprocessorNode::Macro(m) => {
                self.define_runtime_callable(Callable {
                    name: m.name.clone(),
                    case_sensitive: m.case_sensitive,
                    args_count: m.args_count,
                    body: CallableBody::MultiLine(m.body.clone()),
                    loc: m.loc.start,
                })?;
                Ok(Vec::new())
            }
            PreprocessorNode::If(if_node) => {
                let body = self.select_if_branch(if_node)?;
                self.exec_nodes(body)
            }
            PreprocessorNode::Rep(rep) => {
                let count = self.eval_tokens_expression(&rep.count, rep.loc.start)?;
                let mut lines = Vec::new();
                for _ in 0..count.max(0) {
                    self.rep_iterations += 1;
                    if self.rep_iterations > self.config.max_rep_iterations {
                        return Err(PreprocessorError::RepLimitExceeded {
                            limit: self.config.max_rep_iterations,
                            loc: rep.loc.start,
                        });
                    }
                    lines.extend(self.exec_nodes(&rep.body)?);
                }
                Ok(lines)
            }
            PreprocessorNode::Error { message, loc } => {
                let text = self.expand_line(message)?;
                Err(PreprocessorError::UserError {
                    message: text,
                    loc: loc.start,
                })
            }
        }
    }

    /// Value of a bound `%N` macro parameter, else `text` itself.
    fn param_text(&self, text: &str) -> String {
        match self.get_variable(text) {
            Some(value) if text.starts_with(self.config.prefix_char) => value.to_string(),
            _ => text.to_string(),
        }
    }

    /// Directive operands are stored unexpanded; macro parameters still
    /// have to be bound at the point the directive runs.
    fn substitute_params(&self, tokens: &[Token]) -> Vec<Token> {
        tokens
            .iter()
            .map(|t| match t.ty {
                TokenType::Keyword if t.kind.is_none() => {
                    let text = self.param_text(&t.text);
                    if text == t.text {
                        t.clone()
                    } else {
                        Token::keyword(text, t.loc)
                    }
                }
                _ => t.clone(),
            })
            .collect()
    }

    /// Records `NAME equ expr` / `NAME: equ expr` as a loose binding when constant.
    fn scan_equ(&mut self, tokens: &[Token]) {
        let Some(name) = tokens.first().filter(|t| t.ty == TokenType::Keyword) else {
            return;
        };
        let rest = match tokens.get(1) {
            Some(t) if t.text == ":" => &tokens[2..],
            _ => &tokens[1..],
        };
        let Some((equ, expression)) = rest.split_first() else {
            return;
        };
        if !equ.text.eq_ignore_ascii_case("equ") || expression.is_empty() {
            return;
        }

        let text = join_tokens(expression);
        let value = rpn(&text, &|n: &str| self.resolve_keyword(n));
        if let Ok(value) = value {
            trace!(name = %name.text, value, "equ binding");
            self.set_loose_variable(&name.text, value);
        }
    }
}

fn is_forward_reference(err: &PreprocessorError) -> bool {
    matches!(
        err,
        PreprocessorError::IncorrectMathExpression {
            source: MathError::UnknownKeyword { .. },
            ..
        }
    )
}

/// Balanced span starting at `start` (which must hold `up`).
/// Returns the inner tokens and the index right after the closing token.
fn extract_nestable<'a>(tokens: &'a [Token], start: usize, up: &str, down: &str) -> Option<(&'a [Token], usize)> {
    if tokens.get(start)?.text != up {
        return None;
    }
    let mut depth = 0usize;
    for (idx, t) in tokens.iter().enumerate().skip(start) {
        if t.text == up {
            depth += 1;
        } else if t.text == down {
            depth -= 1;
            if depth == 0 {
                return Some((&tokens[start + 1..idx], idx + 1));
            }
        } else if t.is_eol() {
            return None;
        }
    }
    None
}

/// Collects comma separated call arguments starting at `start`.
/// Bracketed calls consume up to the matching `)`, others up to end of line.
fn fetch_runtime_call_args_list(tokens: &[Token], start: usize, bracket: bool) -> Option<(Vec<Vec<Token>>, usize)> {
    let (body, end) = if bracket {
        let (inner, end) = extract_nestable(tokens, start, "(", ")")?;
        (inner, end)
    } else {
        let stop = tokens[start.min(tokens.len())..]
            .iter()
            .position(Token::is_eol)
            .map_or(tokens.len(), |p| start + p);
        (&tokens[start.min(stop)..stop], stop)
    };

    if body.is_empty() {
        return Some((Vec::new(), end));
    }

    let mut args = vec![Vec::new()];
    let mut depth = 0i32;
    for t in body {
        match t.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth -= 1,
            "," if depth == 0 && t.ty == TokenType::Operator => {
                args.push(Vec::new());
                continue;
            }
            _ => {}
        }
        if let Some(last) = args.last_mut() {
            last.push(t.clone());
        }
    }
    Some((args, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tokenize;

    fn run(src: &str) -> Result<String> {
        PreprocessorInterpreter::default().exec(src).map(|(text, _)| text)
    }

    #[test]
    fn inline_define_and_call() {
        let out = run("%define VAL 0x10\n%define add(a, b) a + b\ndb VAL\ndb add(1, 2)\n").unwrap();
        assert_eq!(out, "db 0x10\ndb 1 + 2\n");
    }

    #[test]
    fn bracket_expression_evaluates() {
        let out = run("%define N 4\ndb %[N * 2]\n").unwrap();
        assert_eq!(out, "db 8\n");
    }

    #[test]
    fn glued_bracket_expression_concatenates() {
        let out = run("%assign i 3\nlabel%[i + 1]:\n").unwrap();
        assert_eq!(out, "label4 :\n");
    }

    #[test]
    fn multiline_macro_with_local_labels() {
        let out = run("%macro twice 1\n%%top: db %1\ndb %1\n%endmacro\ntwice 7\ntwice 8\n").unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("..@") && lines[0].ends_with("_top : db 7"));
        assert!(lines[2].ends_with("_top : db 8"));
        assert_ne!(lines[0], lines[2].replace('8', "7"));
        assert_eq!(lines[1], "db 7");
    }

    #[test]
    fn macro_argument_count_in_percent_zero() {
        let out = run("%macro count 3\ndb %0\n%endmacro\ncount 1, 2, 3\n").unwrap();
        assert_eq!(out, "db 3\n");
    }

    #[test]
    fn conditionals_pick_branch() {
        let src = "%define MODE 2\n%if MODE == 1\ndb 1\n%elif MODE == 2\ndb 2\n%else\ndb 3\n%endif\n";
        assert_eq!(run(src).unwrap(), "db 2\n");
        assert_eq!(run("%ifdef NOPE\ndb 1\n%else\ndb 0\n%endif\n").unwrap(), "db 0\n");
        assert_eq!(run("%ifndef NOPE\ndb 1\n%endif\n").unwrap(), "db 1\n");
    }

    #[test]
    fn rep_with_assign_counter() {
        let out = run("%assign i 0\n%rep 3\ndb i\n%assign i i+1\n%endrep\n").unwrap();
        assert_eq!(out, "db 0\ndb 1\ndb 2\n");
    }

    #[test]
    fn forward_equ_defers_if() {
        let mut interpreter = PreprocessorInterpreter::default();
        let (out, _) = interpreter
            .exec("%if abc2 > 0\ndb 1\n%endif\nabc2: equ 2\n")
            .unwrap();
        assert_eq!(out, "db 1\nabc2 : equ 2\n");
        assert!(!interpreter.second_pass_exec());
    }

    #[test]
    fn unknown_symbol_in_second_pass_fails() {
        let err = run("%if missing\ndb 1\n%endif\n").unwrap_err();
        assert!(matches!(err, PreprocessorError::IncorrectMathExpression { .. }));
    }

    #[test]
    fn macro_used_before_definition() {
        let out = run("db LATER\n%define LATER 5\n").unwrap();
        assert_eq!(out, "db 5\n");
    }

    #[test]
    fn zero_arg_redefinition_and_overloads() {
        let mut interpreter = PreprocessorInterpreter::default();
        let (out, _) = interpreter
            .exec("%define X 1\n%define X 2\n%define X(a) a\ndb X\ndb X(9)\n")
            .unwrap();
        assert_eq!(out, "db 2\ndb 9\n");
        assert_eq!(interpreter.get_callables("X").len(), 2);
    }

    #[test]
    fn duplicate_macro_arity_fails() {
        let err = run("%macro m 1\nnop\n%endmacro\n%macro m 1\nhlt\n%endmacro\n").unwrap_err();
        assert!(matches!(err, PreprocessorError::MacroAlreadyExists { .. }));
        let err = run("%define f(a) a\n%define f 1\n").unwrap_err();
        assert!(matches!(err, PreprocessorError::MacroAlreadyExists { .. }));
    }

    #[test]
    fn duplicate_parameter_names_fail() {
        let err = run("%define f(a, a) a\ndb f(1, 2)\n").unwrap_err();
        assert!(matches!(err, PreprocessorError::VariableAlreadyExistsInCurrentScope { .. }));
    }

    #[test]
    fn case_insensitive_callables() {
        let out = run("%idefine Size 4\ndb SIZE\ndb size\n%define Size 8\ndb Size\n").unwrap();
        assert_eq!(out, "db 4\ndb 4\ndb 8\n");
    }

    #[test]
    fn mismatched_self_call_terminates() {
        let out = run("%define f(x) f(x, 1)\nf(2)\n").unwrap();
        assert_eq!(out, "f ( 2 , 1 )\n");
    }

    #[test]
    fn self_recursive_macro_hits_limit() {
        let config = AssemblerConfig {
            max_recursion_depth: 16,
            ..AssemblerConfig::default()
        };
        let err = PreprocessorInterpreter::new(config).exec("%define g g\ndb g\n").unwrap_err();
        assert!(matches!(err, PreprocessorError::RecursionLimitExceeded { .. }));
    }

    #[test]
    fn plain_define_before_parenthesis() {
        let out = run("%define BASE 0x10\ndb BASE (1 + 2)\n").unwrap();
        assert_eq!(out, "db 0x10 ( 1 + 2 )\n");
    }

    #[test]
    fn wrong_arity_leaves_call_text() {
        let out = run("%macro pair 2\ndb %1, %2\n%endmacro\npair 1\n").unwrap();
        assert_eq!(out, "pair 1\n");
    }

    #[test]
    fn scope_shadowing_and_release() {
        let mut interpreter = PreprocessorInterpreter::default();
        interpreter.set_variable("x", InterpreterValue::Number(1), TokenLocation::default()).unwrap();
        assert!(matches!(
            interpreter.set_variable("x", InterpreterValue::Number(2), TokenLocation::default()),
            Err(PreprocessorError::VariableAlreadyExistsInCurrentScope { .. })
        ));

        let inner = interpreter
            .enter_scope(vec![("x".into(), InterpreterValue::Number(5))], TokenLocation::default(), |this| {
                Ok(this.get_variable("x").cloned())
            })
            .unwrap();
        assert_eq!(inner, Some(InterpreterValue::Number(5)));
        assert_eq!(interpreter.get_variable("x"), Some(&InterpreterValue::Number(1)));

        let failed: Result<()> = interpreter.enter_scope(
            vec![("y".into(), InterpreterValue::Number(1))],
            TokenLocation::default(),
            |_| {
                Err(PreprocessorError::UserError {
                    message: "boom".into(),
                    loc: TokenLocation::default(),
                })
            },
        );
        assert!(failed.is_err());
        assert_eq!(interpreter.get_variable("y"), None);
        assert_eq!(interpreter.current_scope().id, ScopeId(0));
    }

    #[test]
    fn remove_macros_reports_changes() {
        let mut interpreter = PreprocessorInterpreter::default();
        let tokens = tokenize("mov ax, bx").unwrap();
        let (changed, out) = interpreter.remove_macros_from_tokens(&tokens).unwrap();
        assert!(!changed);
        assert_eq!(out, tokens);
    }

    #[test]
    fn user_error_directive() {
        let err = run("%define WHY bad\n%error WHY input\n").unwrap_err();
        match err {
            PreprocessorError::UserError { message, .. } => assert_eq!(message, "bad input"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn pre_exec_runs_once() {
        let config = AssemblerConfig::default().with_define("DEBUG", Some("1"));
        let mut interpreter = PreprocessorInterpreter::new(config);
        assert_eq!(interpreter.exec("%ifdef DEBUG\ndb DEBUG\n%endif\n").unwrap().0, "db 1\n");
        assert_eq!(interpreter.exec("db DEBUG\n").unwrap().0, "db 1\n");
    }
}
