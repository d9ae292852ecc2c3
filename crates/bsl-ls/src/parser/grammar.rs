//
// parser/grammar.rs
//
// Recursive-descent parser for BSL modules
//

use std::ops::Range as Span;

use tower_lsp::lsp_types::Range;

use super::lexer::{tokenize, Keyword, Lexeme, LexemeKind, Token};
use super::tree::{Node, NodeKind, ParseTree, SubDeclaration};
use crate::utf16::LineIndex;

/// Parse a module. Never fails: malformed input yields `Error` nodes.
pub fn parse_module(source: &str) -> ParseTree {
    let mut parser = Parser::new(source);
    let root = parser.parse_file();
    ParseTree { root }
}

enum Directive<'a> {
    RegionStart { name: &'a str, name_offset: usize },
    RegionEnd,
    Other,
}

/// Classify a preprocessor line; `name_offset` is relative to the line start
fn classify_directive(text: &str) -> Directive<'_> {
    let body = text.strip_prefix('#').unwrap_or(text);
    let lead = body.len() - body.trim_start().len();
    let body = body.trim_start();
    let word_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let word = body[..word_end].to_lowercase();
    match word.as_str() {
        "область" | "region" => {
            let rest = &body[word_end..];
            let gap = rest.len() - rest.trim_start().len();
            let name = rest.trim_start().split_whitespace().next().unwrap_or("");
            Directive::RegionStart {
                name,
                name_offset: 1 + lead + word_end + gap,
            }
        }
        "конецобласти" | "endregion" => Directive::RegionEnd,
        _ => Directive::Other,
    }
}

fn starts_statement(keyword: Keyword) -> bool {
    matches!(
        keyword,
        Keyword::If
            | Keyword::While
            | Keyword::For
            | Keyword::Try
            | Keyword::Return
            | Keyword::Break
            | Keyword::Continue
            | Keyword::Raise
            | Keyword::Goto
            | Keyword::Var
            | Keyword::Procedure
            | Keyword::Function
            | Keyword::Async
            | Keyword::AddHandler
            | Keyword::RemoveHandler
    )
}

/// Unquote a string literal, collapsing doubled quotes
fn unquote(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    inner.replace("\"\"", "\"")
}

struct Parser<'a> {
    source: &'a str,
    lexemes: Vec<Lexeme>,
    pos: usize,
    lines: LineIndex,
    /// Byte end of the last consumed lexeme
    prev_end: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            lexemes: tokenize(source),
            pos: 0,
            lines: LineIndex::new(source),
            prev_end: 0,
        }
    }

    // ========================================================================
    // Token cursor
    // ========================================================================

    fn peek_kind(&self) -> Option<LexemeKind> {
        self.lexemes.get(self.pos).map(|l| l.kind)
    }

    fn peek_span(&self) -> Span<usize> {
        self.lexemes
            .get(self.pos)
            .map(|l| l.span.clone())
            .unwrap_or(self.source.len()..self.source.len())
    }

    fn nth_kind(&self, n: usize) -> Option<LexemeKind> {
        self.lexemes.get(self.pos + n).map(|l| l.kind)
    }

    fn at_token(&self, token: Token) -> bool {
        self.peek_kind() == Some(LexemeKind::Token(token))
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.peek_kind() == Some(LexemeKind::Keyword(keyword))
    }

    /// Identifier or keyword used as a member name after `.`
    fn at_name(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(LexemeKind::Token(Token::Identifier)) | Some(LexemeKind::Keyword(_))
        )
    }

    fn start_offset(&self) -> usize {
        self.peek_span().start
    }

    /// Consume one lexeme; at end of input this is a no-op returning an
    /// empty span
    fn bump(&mut self) -> Span<usize> {
        match self.lexemes.get(self.pos) {
            Some(lexeme) => {
                let span = lexeme.span.clone();
                self.pos += 1;
                self.prev_end = span.end;
                span
            }
            None => self.prev_end..self.prev_end,
        }
    }

    fn eat_token(&mut self, token: Token) -> bool {
        if self.at_token(token) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn text(&self, span: Span<usize>) -> &'a str {
        let source: &'a str = self.source;
        source.get(span).unwrap_or("")
    }

    fn range(&self, start: usize, end: usize) -> Range {
        self.lines.range(self.source, start, end.max(start))
    }

    fn span_range(&self, span: &Span<usize>) -> Range {
        self.range(span.start, span.end)
    }

    /// Node spanning from `start` to the end of the last consumed lexeme
    fn node(&self, kind: NodeKind, start: usize, children: Vec<Node>) -> Node {
        Node::new(kind, self.range(start, self.prev_end), children)
    }

    /// Zero-width error at the end of the consumed input
    fn missing(&self, message: &str) -> Node {
        Node::leaf(
            NodeKind::Error {
                message: message.to_string(),
            },
            self.range(self.prev_end, self.prev_end),
        )
    }

    fn expect_token(&mut self, token: Token, message: &str, children: &mut Vec<Node>) {
        if !self.eat_token(token) {
            children.push(self.missing(message));
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, message: &str, children: &mut Vec<Node>) {
        if !self.eat_keyword(keyword) {
            children.push(self.missing(message));
        }
    }

    // ========================================================================
    // Module structure
    // ========================================================================

    fn parse_file(&mut self) -> Node {
        let children = self.parse_items(false);
        Node::new(
            NodeKind::File,
            self.range(0, self.source.len()),
            children,
        )
    }

    /// Module-level items until end of input, or until `#КонецОбласти` when
    /// inside a region
    fn parse_items(&mut self, in_region: bool) -> Vec<Node> {
        let mut items = Vec::new();
        let mut annotations: Vec<Node> = Vec::new();
        let mut annotations_start: Option<usize> = None;

        while let Some(kind) = self.peek_kind() {
            match kind {
                LexemeKind::Token(Token::Preprocessor) => {
                    let span = self.peek_span();
                    match classify_directive(self.text(span.clone())) {
                        Directive::RegionStart { .. } => {
                            items.append(&mut annotations);
                            annotations_start = None;
                            items.push(self.parse_region());
                        }
                        Directive::RegionEnd if in_region => break,
                        _ => {
                            self.bump();
                            let text = self.text(span.clone()).to_string();
                            items.push(Node::leaf(
                                NodeKind::Preprocessor { text },
                                self.span_range(&span),
                            ));
                        }
                    }
                }
                LexemeKind::Token(Token::Annotation) => {
                    annotations_start.get_or_insert(self.start_offset());
                    annotations.push(self.parse_annotation());
                }
                LexemeKind::Keyword(Keyword::Procedure | Keyword::Function | Keyword::Async) => {
                    let start = annotations_start.take().unwrap_or(self.start_offset());
                    let sub = self.parse_sub(std::mem::take(&mut annotations), start);
                    items.push(sub);
                }
                LexemeKind::Keyword(Keyword::Var) => {
                    items.append(&mut annotations);
                    annotations_start = None;
                    let declaration = self.parse_var_declaration(NodeKind::ModuleVarDeclaration);
                    items.push(self.finish_statement(declaration));
                }
                LexemeKind::Token(Token::Semicolon) => {
                    self.bump();
                }
                LexemeKind::Keyword(keyword) if keyword.ends_block() => {
                    let start = self.start_offset();
                    self.bump();
                    items.push(self.node(
                        NodeKind::Error {
                            message: "unexpected end of block".to_string(),
                        },
                        start,
                        Vec::new(),
                    ));
                }
                _ => {
                    items.append(&mut annotations);
                    annotations_start = None;
                    items.push(self.parse_statement());
                }
            }
        }

        items.append(&mut annotations);
        items
    }

    fn parse_region(&mut self) -> Node {
        let span = self.bump();
        let text = self.text(span.clone());
        let (name, name_range) = match classify_directive(text) {
            Directive::RegionStart { name, name_offset } => {
                let name_start = span.start + name_offset;
                (name.to_string(), self.range(name_start, name_start + name.len()))
            }
            _ => (String::new(), self.span_range(&span)),
        };

        let mut children = self.parse_items(true);
        if self.at_token(Token::Preprocessor) {
            self.bump();
        } else {
            children.push(self.missing("expected #КонецОбласти"));
        }
        self.node(NodeKind::Region { name, name_range }, span.start, children)
    }

    fn parse_annotation(&mut self) -> Node {
        let span = self.bump();
        let name_start = (span.start + 1).min(span.end);
        let name = self.text(name_start..span.end).to_string();
        let name_range = self.range(name_start, span.end);

        let mut params = Vec::new();
        if self.eat_token(Token::LParen) {
            while !self.at_token(Token::RParen) && self.peek_kind().is_some() {
                let start = self.start_offset();
                let param_name = if self.at_name() && self.nth_kind(1) == Some(LexemeKind::Token(Token::Assign)) {
                    let name_span = self.bump();
                    self.bump();
                    Some(self.text(name_span).to_string())
                } else {
                    None
                };

                let value_start = self.start_offset();
                let mut value = None;
                if !self.at_token(Token::Comma) && !self.at_token(Token::RParen) {
                    let expression = self.parse_expression();
                    if expression.contains_errors() {
                        params.push(expression);
                    } else {
                        let text = self.text(value_start..self.prev_end);
                        value = Some(if text.starts_with('"') {
                            unquote(text)
                        } else {
                            text.to_string()
                        });
                    }
                }
                params.push(self.node(
                    NodeKind::AnnotationParam {
                        name: param_name,
                        value,
                    },
                    start,
                    Vec::new(),
                ));
                if !self.eat_token(Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RParen, "expected )", &mut params);
        }

        self.node(NodeKind::Annotation { name, name_range }, span.start, params)
    }

    fn parse_sub(&mut self, annotations: Vec<Node>, start: usize) -> Node {
        let mut children = annotations;
        let is_async = self.eat_keyword(Keyword::Async);
        let is_function = if self.eat_keyword(Keyword::Function) {
            true
        } else {
            if !self.eat_keyword(Keyword::Procedure) {
                children.push(self.missing("expected Процедура or Функция"));
            }
            false
        };

        let (name, name_range) = if self.at_token(Token::Identifier) {
            let span = self.bump();
            (self.text(span.clone()).to_string(), self.span_range(&span))
        } else {
            children.push(self.missing("expected method name"));
            (String::new(), self.range(self.prev_end, self.prev_end))
        };

        if self.eat_token(Token::LParen) {
            self.parse_params(&mut children);
            self.expect_token(Token::RParen, "expected )", &mut children);
        } else {
            children.push(self.missing("expected ("));
        }

        let export = self.eat_keyword(Keyword::Export);

        let (end_keyword, other_end) = if is_function {
            (Keyword::EndFunction, Keyword::EndProcedure)
        } else {
            (Keyword::EndProcedure, Keyword::EndFunction)
        };
        loop {
            children.extend(self.parse_statements());
            match self.peek_kind() {
                Some(LexemeKind::Keyword(k)) if k == end_keyword => {
                    self.bump();
                    break;
                }
                Some(LexemeKind::Keyword(k)) if k == other_end => {
                    let end_start = self.start_offset();
                    self.bump();
                    children.push(self.node(
                        NodeKind::Error {
                            message: "mismatched end of method".to_string(),
                        },
                        end_start,
                        Vec::new(),
                    ));
                    break;
                }
                Some(LexemeKind::Keyword(k)) if k.ends_block() => {
                    let stray = self.start_offset();
                    self.bump();
                    children.push(self.node(
                        NodeKind::Error {
                            message: "unexpected end of block".to_string(),
                        },
                        stray,
                        Vec::new(),
                    ));
                }
                _ => {
                    children.push(self.missing("expected end of method"));
                    break;
                }
            }
        }

        let declaration = SubDeclaration {
            name,
            name_range,
            is_function,
            export,
            is_async,
        };
        self.node(NodeKind::Sub(declaration), start, children)
    }

    fn parse_params(&mut self, children: &mut Vec<Node>) {
        while !self.at_token(Token::RParen) && self.peek_kind().is_some() {
            while self.at_token(Token::Annotation) {
                self.parse_annotation();
            }
            let by_value = self.eat_keyword(Keyword::Val);
            if self.at_token(Token::Identifier) {
                let span = self.bump();
                let name = self.text(span.clone()).to_string();
                let mut param = Node::leaf(NodeKind::Param { name, by_value }, self.span_range(&span));
                if self.eat_token(Token::Assign) {
                    let default = self.parse_expression();
                    if default.contains_errors() {
                        param.children.push(self.missing("invalid default value"));
                    }
                }
                children.push(param);
            } else {
                let start = self.start_offset();
                if !self.at_token(Token::Comma) {
                    self.bump();
                }
                children.push(self.node(
                    NodeKind::Error {
                        message: "expected parameter name".to_string(),
                    },
                    start,
                    Vec::new(),
                ));
            }
            if !self.eat_token(Token::Comma) {
                break;
            }
        }
    }

    fn parse_var_declaration(&mut self, kind: NodeKind) -> Node {
        let start = self.start_offset();
        self.bump();
        let mut children = Vec::new();
        loop {
            if self.at_token(Token::Identifier) {
                let span = self.bump();
                let name = self.text(span.clone()).to_string();
                let export = self.eat_keyword(Keyword::Export);
                children.push(Node::leaf(NodeKind::VarName { name, export }, self.span_range(&span)));
            } else {
                children.push(self.missing("expected variable name"));
                break;
            }
            if !self.eat_token(Token::Comma) {
                break;
            }
        }
        self.node(kind, start, children)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Statements until end of input, a block-closing keyword or the start of
    /// another method
    fn parse_statements(&mut self) -> Vec<Node> {
        let mut statements = Vec::new();
        while let Some(kind) = self.peek_kind() {
            match kind {
                LexemeKind::Keyword(keyword) if keyword.ends_block() => break,
                LexemeKind::Keyword(Keyword::Procedure | Keyword::Function | Keyword::Async) => break,
                LexemeKind::Token(Token::Semicolon) => {
                    self.bump();
                }
                LexemeKind::Token(Token::Preprocessor) => {
                    let span = self.bump();
                    let text = self.text(span.clone()).to_string();
                    statements.push(Node::leaf(NodeKind::Preprocessor { text }, self.span_range(&span)));
                }
                _ => statements.push(self.parse_statement()),
            }
        }
        statements
    }

    fn parse_statement(&mut self) -> Node {
        let statement = match self.peek_kind() {
            Some(LexemeKind::Keyword(Keyword::If)) => self.parse_if(),
            Some(LexemeKind::Keyword(Keyword::While)) => self.parse_while(),
            Some(LexemeKind::Keyword(Keyword::For)) => self.parse_for(),
            Some(LexemeKind::Keyword(Keyword::Try)) => self.parse_try(),
            Some(LexemeKind::Keyword(Keyword::Return)) => self.parse_with_optional_expression(NodeKind::ReturnStatement),
            Some(LexemeKind::Keyword(Keyword::Raise)) => self.parse_with_optional_expression(NodeKind::RaiseStatement),
            Some(LexemeKind::Keyword(Keyword::Break)) => {
                let span = self.bump();
                Node::leaf(NodeKind::BreakStatement, self.span_range(&span))
            }
            Some(LexemeKind::Keyword(Keyword::Continue)) => {
                let span = self.bump();
                Node::leaf(NodeKind::ContinueStatement, self.span_range(&span))
            }
            Some(LexemeKind::Keyword(Keyword::Goto)) => {
                let start = self.start_offset();
                self.bump();
                let mut children = Vec::new();
                self.expect_token(Token::Label, "expected label", &mut children);
                self.node(NodeKind::GotoStatement, start, children)
            }
            Some(LexemeKind::Keyword(Keyword::Var)) => self.parse_var_declaration(NodeKind::SubVarDeclaration),
            Some(LexemeKind::Keyword(Keyword::AddHandler | Keyword::RemoveHandler)) => {
                let start = self.start_offset();
                self.bump();
                let mut children = vec![self.parse_expression()];
                self.expect_token(Token::Comma, "expected ,", &mut children);
                children.push(self.parse_expression());
                self.node(NodeKind::HandlerStatement, start, children)
            }
            Some(LexemeKind::Keyword(Keyword::Await)) => {
                let start = self.start_offset();
                let expression = self.parse_expression();
                self.node(NodeKind::CallStatement, start, vec![expression])
            }
            Some(LexemeKind::Token(Token::Label)) => {
                let start = self.start_offset();
                let span = self.bump();
                let name = self.text(span).trim_start_matches('~').to_string();
                let mut children = Vec::new();
                self.expect_token(Token::Colon, "expected :", &mut children);
                self.node(NodeKind::LabelStatement { name }, start, children)
            }
            Some(LexemeKind::Token(Token::Annotation)) => {
                let start = self.start_offset();
                self.bump();
                self.node(
                    NodeKind::Error {
                        message: "annotation is not allowed here".to_string(),
                    },
                    start,
                    Vec::new(),
                )
            }
            _ => self.parse_expression_statement(),
        };
        self.finish_statement(statement)
    }

    /// Consume the `;` after a statement. A missing separator is only an
    /// error when another statement follows directly.
    fn finish_statement(&mut self, mut statement: Node) -> Node {
        if self.eat_token(Token::Semicolon) {
            return statement;
        }
        let terminated = match self.peek_kind() {
            None => true,
            Some(LexemeKind::Keyword(keyword)) => keyword.ends_block(),
            Some(LexemeKind::Token(Token::Preprocessor)) => true,
            _ => false,
        };
        let is_label = matches!(statement.kind, NodeKind::LabelStatement { .. });
        if !terminated && !is_label && !statement.is_error() {
            statement.children.push(self.missing("expected ;"));
        }
        statement
    }

    fn parse_expression_statement(&mut self) -> Node {
        let start = self.start_offset();
        let Some(target) = self.parse_complex_identifier() else {
            return self.recover(start, "expected statement");
        };

        if self.eat_token(Token::Assign) {
            let value = self.parse_expression();
            let name = match target.children.as_slice() {
                [only] => match &only.kind {
                    NodeKind::Identifier { name } => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            };
            let lvalue = Node::new(NodeKind::LValue { name }, target.range, target.children);
            self.node(NodeKind::Assignment, start, vec![lvalue, value])
        } else {
            self.node(NodeKind::CallStatement, start, vec![target])
        }
    }

    /// Skip to the next statement boundary, producing an `Error` node that
    /// covers the skipped text. Always consumes at least one lexeme.
    fn recover(&mut self, start: usize, message: &str) -> Node {
        self.bump();
        while let Some(kind) = self.peek_kind() {
            let boundary = match kind {
                LexemeKind::Token(Token::Semicolon) | LexemeKind::Token(Token::Preprocessor) => true,
                LexemeKind::Keyword(keyword) => keyword.ends_block() || starts_statement(keyword),
                _ => false,
            };
            if boundary {
                break;
            }
            self.bump();
        }
        self.node(
            NodeKind::Error {
                message: message.to_string(),
            },
            start,
            Vec::new(),
        )
    }

    fn parse_if(&mut self) -> Node {
        let start = self.start_offset();
        self.bump();
        let mut children = vec![self.parse_expression()];
        self.expect_keyword(Keyword::Then, "expected Тогда", &mut children);
        children.extend(self.parse_statements());

        loop {
            if self.at_keyword(Keyword::ElsIf) {
                let branch_start = self.start_offset();
                self.bump();
                let mut branch = vec![self.parse_expression()];
                self.expect_keyword(Keyword::Then, "expected Тогда", &mut branch);
                branch.extend(self.parse_statements());
                children.push(self.node(NodeKind::ElsIfBranch, branch_start, branch));
            } else if self.at_keyword(Keyword::Else) {
                let branch_start = self.start_offset();
                self.bump();
                let branch = self.parse_statements();
                children.push(self.node(NodeKind::ElseBranch, branch_start, branch));
            } else {
                break;
            }
        }

        self.expect_keyword(Keyword::EndIf, "expected КонецЕсли", &mut children);
        self.node(NodeKind::IfStatement, start, children)
    }

    fn parse_while(&mut self) -> Node {
        let start = self.start_offset();
        self.bump();
        let mut children = vec![self.parse_expression()];
        self.parse_loop_body(&mut children);
        self.node(NodeKind::WhileStatement, start, children)
    }

    fn parse_for(&mut self) -> Node {
        let start = self.start_offset();
        self.bump();
        let for_each = self.eat_keyword(Keyword::Each);
        let mut children = Vec::new();

        if self.at_token(Token::Identifier) {
            let span = self.bump();
            let name = self.text(span.clone()).to_string();
            children.push(Node::leaf(NodeKind::LoopVariable { name }, self.span_range(&span)));
        } else {
            children.push(self.missing("expected loop variable"));
        }

        if for_each {
            self.expect_keyword(Keyword::In, "expected Из", &mut children);
            children.push(self.parse_expression());
        } else {
            self.expect_token(Token::Assign, "expected =", &mut children);
            children.push(self.parse_expression());
            self.expect_keyword(Keyword::To, "expected По", &mut children);
            children.push(self.parse_expression());
        }
        self.parse_loop_body(&mut children);

        let kind = if for_each {
            NodeKind::ForEachStatement
        } else {
            NodeKind::ForStatement
        };
        self.node(kind, start, children)
    }

    fn parse_loop_body(&mut self, children: &mut Vec<Node>) {
        self.expect_keyword(Keyword::Do, "expected Цикл", children);
        children.extend(self.parse_statements());
        self.expect_keyword(Keyword::EndDo, "expected КонецЦикла", children);
    }

    fn parse_try(&mut self) -> Node {
        let start = self.start_offset();
        self.bump();
        let mut children = self.parse_statements();
        if self.at_keyword(Keyword::Except) {
            let branch_start = self.start_offset();
            self.bump();
            let branch = self.parse_statements();
            children.push(self.node(NodeKind::ExceptBranch, branch_start, branch));
        } else {
            children.push(self.missing("expected Исключение"));
        }
        self.expect_keyword(Keyword::EndTry, "expected КонецПопытки", &mut children);
        self.node(NodeKind::TryStatement, start, children)
    }

    fn parse_with_optional_expression(&mut self, kind: NodeKind) -> Node {
        let start = self.start_offset();
        self.bump();
        let ends_here = match self.peek_kind() {
            None => true,
            Some(LexemeKind::Token(Token::Semicolon | Token::Preprocessor)) => true,
            Some(LexemeKind::Keyword(keyword)) => keyword.ends_block(),
            _ => false,
        };
        let children = if ends_here {
            Vec::new()
        } else {
            vec![self.parse_expression()]
        };
        self.node(kind, start, children)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Operands separated by binary operators. Precedence is not modelled;
    /// the tree only needs the operands.
    fn parse_expression(&mut self) -> Node {
        let start = self.start_offset();
        let mut operands = vec![self.parse_unary()];
        loop {
            let is_operator = match self.peek_kind() {
                Some(LexemeKind::Token(token)) => token.is_binary_operator(),
                Some(LexemeKind::Keyword(Keyword::And | Keyword::Or)) => true,
                _ => false,
            };
            if !is_operator {
                break;
            }
            self.bump();
            operands.push(self.parse_unary());
        }

        if operands.len() == 1 {
            operands.pop().unwrap_or_else(|| self.missing("expected expression"))
        } else {
            self.node(NodeKind::Expression, start, operands)
        }
    }

    fn parse_unary(&mut self) -> Node {
        let start = self.start_offset();
        let mut prefixed = false;
        while matches!(
            self.peek_kind(),
            Some(LexemeKind::Token(Token::Minus | Token::Plus))
                | Some(LexemeKind::Keyword(Keyword::Not | Keyword::Await))
        ) {
            self.bump();
            prefixed = true;
        }
        let operand = self.parse_primary();
        if prefixed {
            self.node(NodeKind::Expression, start, vec![operand])
        } else {
            operand
        }
    }

    fn parse_primary(&mut self) -> Node {
        let start = self.start_offset();
        match self.peek_kind() {
            Some(LexemeKind::Token(Token::String)) => {
                while self.at_token(Token::String) {
                    self.bump();
                }
                self.node(NodeKind::Literal, start, Vec::new())
            }
            Some(LexemeKind::Token(Token::Number | Token::Date))
            | Some(LexemeKind::Keyword(
                Keyword::True | Keyword::False | Keyword::Undefined | Keyword::Null,
            )) => {
                let span = self.bump();
                Node::leaf(NodeKind::Literal, self.span_range(&span))
            }
            Some(LexemeKind::Token(Token::Question)) => self.parse_ternary(),
            Some(LexemeKind::Token(Token::Identifier | Token::LParen))
            | Some(LexemeKind::Keyword(Keyword::New)) => self
                .parse_complex_identifier()
                .unwrap_or_else(|| self.missing("expected expression")),
            Some(LexemeKind::Unknown) => {
                self.bump();
                self.node(
                    NodeKind::Error {
                        message: "unexpected character".to_string(),
                    },
                    start,
                    Vec::new(),
                )
            }
            _ => self.missing("expected expression"),
        }
    }

    fn parse_ternary(&mut self) -> Node {
        let start = self.start_offset();
        self.bump();
        let mut children = Vec::new();
        self.expect_token(Token::LParen, "expected (", &mut children);
        children.push(self.parse_expression());
        self.expect_token(Token::Comma, "expected ,", &mut children);
        children.push(self.parse_expression());
        self.expect_token(Token::Comma, "expected ,", &mut children);
        children.push(self.parse_expression());
        self.expect_token(Token::RParen, "expected )", &mut children);
        self.node(NodeKind::TernaryOperator, start, children)
    }

    /// Base (identifier, global call, `New`, parenthesized expression)
    /// followed by accessors
    fn parse_complex_identifier(&mut self) -> Option<Node> {
        let start = self.start_offset();
        let base = match self.peek_kind()? {
            LexemeKind::Token(Token::Identifier) => {
                let span = self.bump();
                let name = self.text(span.clone()).to_string();
                if self.at_token(Token::LParen) {
                    let args = self.parse_arguments();
                    let name_range = self.span_range(&span);
                    self.node(NodeKind::GlobalMethodCall { name, name_range }, span.start, args)
                } else {
                    Node::leaf(NodeKind::Identifier { name }, self.span_range(&span))
                }
            }
            LexemeKind::Keyword(Keyword::New) => self.parse_new(),
            LexemeKind::Token(Token::LParen) => {
                self.bump();
                let mut inner = vec![self.parse_expression()];
                self.expect_token(Token::RParen, "expected )", &mut inner);
                self.node(NodeKind::Expression, start, inner)
            }
            _ => return None,
        };

        let mut children = vec![base];
        loop {
            if self.at_token(Token::Dot) {
                self.bump();
                if !self.at_name() {
                    children.push(self.missing("expected member name"));
                    break;
                }
                let span = self.bump();
                let name = self.text(span.clone()).to_string();
                if self.at_token(Token::LParen) {
                    let args = self.parse_arguments();
                    let name_range = self.span_range(&span);
                    children.push(self.node(NodeKind::AccessCall { name, name_range }, span.start, args));
                } else {
                    children.push(Node::leaf(NodeKind::AccessProperty { name }, self.span_range(&span)));
                }
            } else if self.at_token(Token::LBracket) {
                let index_start = self.start_offset();
                self.bump();
                let mut index = vec![self.parse_expression()];
                self.expect_token(Token::RBracket, "expected ]", &mut index);
                children.push(self.node(NodeKind::AccessIndex, index_start, index));
            } else {
                break;
            }
        }

        Some(self.node(NodeKind::ComplexIdentifier, start, children))
    }

    fn parse_new(&mut self) -> Node {
        let start = self.start_offset();
        self.bump();
        let (type_name, type_range) = if self.at_token(Token::Identifier) {
            let span = self.bump();
            (
                Some(self.text(span.clone()).to_string()),
                Some(self.span_range(&span)),
            )
        } else {
            (None, None)
        };
        let mut children = Vec::new();
        if self.at_token(Token::LParen) {
            children = self.parse_arguments();
        } else if type_name.is_none() {
            children.push(self.missing("expected type name"));
        }
        self.node(NodeKind::NewExpression { type_name, type_range }, start, children)
    }

    /// `( [expr] {, [expr]} )`; empty arguments are allowed
    fn parse_arguments(&mut self) -> Vec<Node> {
        self.bump();
        let mut args = Vec::new();
        loop {
            match self.peek_kind() {
                None | Some(LexemeKind::Token(Token::RParen | Token::Semicolon)) => break,
                Some(LexemeKind::Token(Token::Comma)) => {
                    self.bump();
                    continue;
                }
                _ => {}
            }
            args.push(self.parse_expression());
            if !self.eat_token(Token::Comma) {
                break;
            }
        }
        self.expect_token(Token::RParen, "expected )", &mut args);
        args
    }
}
