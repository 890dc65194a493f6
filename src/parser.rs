pub mod ast;

use std::mem;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    BinaryOperator, Block, ElseBranch, ExceptClause, Expression, ImportName, Program, Statement,
    UnaryOperator,
};
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} at line {line}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

/// Result of a parse: the well-formed statements that survived, plus one
/// diagnostic per malformed statement the parser skipped over.
#[derive(Debug)]
pub struct Parsed {
    pub program: Program,
    pub errors: Vec<ParseError>,
}

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>) -> Self {
        if !matches!(tokens.last().map(Token::kind), Some(TokenKind::EOF)) {
            tokens.push(Token::new(TokenKind::EOF, Span::default()));
        }
        Self { tokens, pos: 0 }
    }

    /// Parse every top-level statement. A malformed statement is recorded as
    /// a diagnostic and skipped via synchronization; parsing then resumes, so
    /// the resulting program is always well-formed.
    pub fn parse_program(mut self) -> Parsed {
        let mut statements = Vec::new();
        let mut errors = Vec::new();

        while !self.is_at_end() {
            if self.matches(&TokenKind::Newline) {
                continue;
            }
            match self.statement() {
                Ok(statement) => statements.push(statement),
                Err(error) => {
                    errors.push(error);
                    self.synchronize();
                }
            }
        }

        Parsed {
            program: Program { statements },
            errors,
        }
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        if self.matches(&TokenKind::If) {
            return self.if_statement();
        }
        if self.matches(&TokenKind::While) {
            return self.while_statement();
        }
        if self.matches(&TokenKind::For) {
            return self.for_statement();
        }
        if self.matches(&TokenKind::Def) {
            return self.function_def();
        }
        if self.matches(&TokenKind::Class) {
            return self.class_def();
        }
        if self.matches(&TokenKind::Import) {
            return self.import_statement();
        }
        if self.matches(&TokenKind::From) {
            return self.from_import_statement();
        }
        if self.matches(&TokenKind::Try) {
            return self.try_statement();
        }
        if self.matches(&TokenKind::Return) {
            return self.return_statement();
        }

        // Decide between `x = ...`, `x.attr = ...`, and a plain expression
        // with bounded lookahead; nothing is consumed on a non-match.
        if matches!(self.current_kind(), TokenKind::Identifier(_)) {
            match self.peek_kind(1) {
                TokenKind::Assign => return self.assignment(),
                TokenKind::PlusAssign | TokenKind::MinusAssign => {
                    return Err(self.error("Augmented assignment is not supported"));
                }
                TokenKind::Dot => {
                    if matches!(self.peek_kind(2), TokenKind::Identifier(_))
                        && matches!(self.peek_kind(3), TokenKind::Assign)
                    {
                        return self.attribute_assignment();
                    }
                }
                _ => {}
            }
        }

        self.expression_statement()
    }

    fn expression_statement(&mut self) -> Result<Statement, ParseError> {
        let expr = self.expression()?;
        self.consume_optional_newline();
        Ok(Statement::Expr(expr))
    }

    fn assignment(&mut self) -> Result<Statement, ParseError> {
        let name = self.consume_identifier("Expected variable name")?;
        self.consume(&TokenKind::Assign, "Expected '=' after variable name")?;
        let value = self.expression()?;
        self.consume_optional_newline();
        Ok(Statement::Assign { name, value })
    }

    fn attribute_assignment(&mut self) -> Result<Statement, ParseError> {
        let object = self.consume_identifier("Expected object name")?;
        self.consume(&TokenKind::Dot, "Expected '.' after object")?;
        let name = self.consume_identifier("Expected attribute name after '.'")?;
        self.consume(&TokenKind::Assign, "Expected '=' after attribute name")?;
        let value = self.expression()?;
        self.consume_optional_newline();
        Ok(Statement::AttributeAssign {
            object: Expression::Identifier(object),
            name,
            value,
        })
    }

    fn if_statement(&mut self) -> Result<Statement, ParseError> {
        let condition = self.expression()?;
        self.consume(&TokenKind::Colon, "Expected ':' after if condition")?;
        self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
        self.consume(&TokenKind::Indent, "Expected indentation after if statement")?;
        let then_branch = self.block()?;

        let else_branch = if self.matches(&TokenKind::Elif) {
            // `elif` is sugar: the else arm becomes a nested if statement.
            Some(ElseBranch::If(Box::new(self.if_statement()?)))
        } else if self.matches(&TokenKind::Else) {
            self.consume(&TokenKind::Colon, "Expected ':' after else")?;
            self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
            self.consume(&TokenKind::Indent, "Expected indentation after else statement")?;
            Some(ElseBranch::Block(self.block()?))
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Statement, ParseError> {
        let condition = self.expression()?;
        self.consume(&TokenKind::Colon, "Expected ':' after while condition")?;
        self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
        self.consume(&TokenKind::Indent, "Expected indentation after while statement")?;
        let body = self.block()?;
        Ok(Statement::While { condition, body })
    }

    fn for_statement(&mut self) -> Result<Statement, ParseError> {
        let variable = self.consume_identifier("Expected variable name after 'for'")?;
        self.consume(&TokenKind::In, "Expected 'in' after for variable")?;
        let iterable = self.expression()?;
        self.consume(&TokenKind::Colon, "Expected ':' after for clause")?;
        self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
        self.consume(&TokenKind::Indent, "Expected indentation after for statement")?;
        let body = self.block()?;
        Ok(Statement::For {
            variable,
            iterable,
            body,
        })
    }

    fn function_def(&mut self) -> Result<Statement, ParseError> {
        let name = self.consume_identifier("Expected function name after 'def'")?;
        self.consume(&TokenKind::LParen, "Expected '(' after function name")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.consume_identifier("Expected parameter name")?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(&TokenKind::RParen, "Expected ')' after parameters")?;
        self.consume(&TokenKind::Colon, "Expected ':' after function signature")?;
        self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
        self.consume(
            &TokenKind::Indent,
            "Expected indentation after function definition",
        )?;
        let body = self.block()?;
        Ok(Statement::FunctionDef {
            name,
            params,
            body: Rc::new(body),
        })
    }

    fn class_def(&mut self) -> Result<Statement, ParseError> {
        let name = self.consume_identifier("Expected class name after 'class'")?;
        self.consume(&TokenKind::Colon, "Expected ':' after class name")?;
        self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
        self.consume(
            &TokenKind::Indent,
            "Expected indentation after class definition",
        )?;
        let body = self.block()?;
        Ok(Statement::ClassDef { name, body })
    }

    fn import_statement(&mut self) -> Result<Statement, ParseError> {
        let module = self.consume_identifier("Expected module name after 'import'")?;
        let alias = if self.matches(&TokenKind::As) {
            Some(self.consume_identifier("Expected alias name after 'as'")?)
        } else {
            None
        };
        self.consume_optional_newline();
        Ok(Statement::Import { module, alias })
    }

    fn from_import_statement(&mut self) -> Result<Statement, ParseError> {
        let module = self.consume_identifier("Expected module name after 'from'")?;
        self.consume(&TokenKind::Import, "Expected 'import' after module name")?;

        let mut names = Vec::new();
        loop {
            let name = self.consume_identifier("Expected import name")?;
            let alias = if self.matches(&TokenKind::As) {
                Some(self.consume_identifier("Expected alias name after 'as'")?)
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }

        self.consume_optional_newline();
        Ok(Statement::FromImport { module, names })
    }

    fn return_statement(&mut self) -> Result<Statement, ParseError> {
        if self.check(&TokenKind::Newline) || self.check(&TokenKind::Dedent) || self.is_at_end() {
            self.consume_optional_newline();
            return Ok(Statement::Return(None));
        }
        let value = self.expression()?;
        self.consume_optional_newline();
        Ok(Statement::Return(Some(value)))
    }

    fn try_statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.current_line();
        self.consume(&TokenKind::Colon, "Expected ':' after 'try'")?;
        self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
        self.consume(&TokenKind::Indent, "Expected indentation after try statement")?;
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.matches(&TokenKind::Except) {
            let mut type_name = None;
            let mut binding = None;
            if matches!(self.current_kind(), TokenKind::Identifier(_)) {
                type_name = Some(self.consume_identifier("Expected exception type")?);
                if self.matches(&TokenKind::As) {
                    binding = Some(self.consume_identifier("Expected variable name after 'as'")?);
                }
            }
            self.consume(&TokenKind::Colon, "Expected ':' after except clause")?;
            self.consume(&TokenKind::Newline, "Expected newline after ':'")?;
            self.consume(&TokenKind::Indent, "Expected indentation after except clause")?;
            let body = self.block()?;
            handlers.push(ExceptClause {
                type_name,
                binding,
                body,
            });
        }

        if handlers.is_empty() {
            return Err(ParseError {
                message: "Try statement must have at least one except clause".to_string(),
                line,
            });
        }

        Ok(Statement::Try { body, handlers })
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        let mut statements = Vec::new();

        while !self.check(&TokenKind::Dedent) && !self.is_at_end() {
            if self.matches(&TokenKind::Newline) {
                continue;
            }
            statements.push(self.statement()?);
        }

        self.consume(&TokenKind::Dedent, "Expected dedent to close block")?;
        Ok(Block { statements })
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        self.logical_or()
    }

    fn logical_or(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.logical_and()?;
        while self.matches(&TokenKind::Or) {
            let right = self.logical_and()?;
            expr = binary(expr, BinaryOperator::Or, right);
        }
        Ok(expr)
    }

    fn logical_and(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.equality()?;
        while self.matches(&TokenKind::And) {
            let right = self.equality()?;
            expr = binary(expr, BinaryOperator::And, right);
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.comparison()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::Equal, BinaryOperator::Equal),
            (TokenKind::NotEqual, BinaryOperator::NotEqual),
        ]) {
            let right = self.comparison()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.term()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::Less, BinaryOperator::Less),
            (TokenKind::LessEqual, BinaryOperator::LessEqual),
            (TokenKind::Greater, BinaryOperator::Greater),
            (TokenKind::GreaterEqual, BinaryOperator::GreaterEqual),
        ]) {
            let right = self.term()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn term(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.factor()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::Plus, BinaryOperator::Add),
            (TokenKind::Minus, BinaryOperator::Sub),
        ]) {
            let right = self.factor()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.power()?;
        while let Some(op) = self.match_operator(&[
            (TokenKind::Multiply, BinaryOperator::Mul),
            (TokenKind::Divide, BinaryOperator::Div),
            (TokenKind::Modulo, BinaryOperator::Mod),
        ]) {
            let right = self.power()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn power(&mut self) -> Result<Expression, ParseError> {
        let expr = self.unary()?;
        if self.matches(&TokenKind::Power) {
            // Right associative.
            let right = self.power()?;
            return Ok(binary(expr, BinaryOperator::Pow, right));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expression, ParseError> {
        let op = if self.matches(&TokenKind::Not) {
            Some(UnaryOperator::Not)
        } else if self.matches(&TokenKind::Minus) {
            Some(UnaryOperator::Neg)
        } else {
            None
        };

        if let Some(op) = op {
            let operand = self.unary()?;
            return Ok(Expression::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        self.call()
    }

    fn call(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.primary()?;

        loop {
            if self.matches(&TokenKind::LParen) {
                let args = self.arguments()?;
                self.consume(&TokenKind::RParen, "Expected ')' after arguments")?;
                expr = Expression::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.matches(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.consume(&TokenKind::RBracket, "Expected ']' after index")?;
                expr = Expression::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.matches(&TokenKind::Dot) {
                let name = self.consume_identifier("Expected attribute name after '.'")?;
                expr = Expression::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expression, ParseError> {
        let kind = self.current_kind().clone();
        let expr = match kind {
            TokenKind::True => {
                self.advance();
                Expression::Boolean(true)
            }
            TokenKind::False => {
                self.advance();
                Expression::Boolean(false)
            }
            TokenKind::None => {
                self.advance();
                Expression::None
            }
            TokenKind::Number(value) => {
                self.advance();
                Expression::Number(value)
            }
            TokenKind::Str(value) => {
                self.advance();
                Expression::Str(value)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Expression::Identifier(name.to_string())
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(&TokenKind::RParen, "Expected ')' after expression")?;
                expr
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        elements.push(self.expression()?);
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(&TokenKind::RBracket, "Expected ']' after list elements")?;
                Expression::List(elements)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let key = self.expression()?;
                        self.consume(&TokenKind::Colon, "Expected ':' after dictionary key")?;
                        let value = self.expression()?;
                        pairs.push((key, value));
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(&TokenKind::RBrace, "Expected '}' after dictionary pairs")?;
                Expression::Dict(pairs)
            }
            _ => return Err(self.error("Expected expression")),
        };
        Ok(expr)
    }

    fn match_operator(
        &mut self,
        candidates: &[(TokenKind<'static>, BinaryOperator)],
    ) -> Option<BinaryOperator> {
        for (kind, op) in candidates {
            if self.check(kind) {
                self.advance();
                return Some(*op);
            }
        }
        None
    }

    /// Discard tokens until just past a newline or just before a token that
    /// can begin a statement.
    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if matches!(self.previous_kind(), TokenKind::Newline) {
                return;
            }
            match self.current_kind() {
                TokenKind::Def
                | TokenKind::Class
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn consume(&mut self, kind: &TokenKind<'static>, message: &str) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            return Ok(());
        }
        Err(self.error(message))
    }

    fn consume_identifier(&mut self, message: &str) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = self.current_kind() {
            let name = (*name).to_string();
            self.advance();
            return Ok(name);
        }
        Err(self.error(message))
    }

    fn consume_optional_newline(&mut self) {
        if self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn check(&self, kind: &TokenKind<'_>) -> bool {
        mem::discriminant(self.current_kind()) == mem::discriminant(kind)
    }

    fn matches(&mut self, kind: &TokenKind<'_>) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::EOF)
    }

    fn current(&self) -> &Token<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> &TokenKind<'a> {
        self.current().kind()
    }

    fn previous_kind(&self) -> &TokenKind<'a> {
        &self.tokens[self.pos.saturating_sub(1)].kind
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind<'a> {
        self.tokens
            .get(self.pos + offset)
            .map(Token::kind)
            .unwrap_or(&TokenKind::EOF)
    }

    fn current_line(&self) -> usize {
        self.current().span.line
    }

    /// A lexical-error token reports its own message; everything else
    /// reports what the parser expected.
    fn error(&self, message: &str) -> ParseError {
        let message = match self.current_kind() {
            TokenKind::Invalid(lexical) => lexical.clone(),
            _ => message.to_string(),
        };
        ParseError {
            message,
            line: self.current_line(),
        }
    }
}

fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
    Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

pub fn parse_tokens(tokens: Vec<Token<'_>>) -> Parsed {
    Parser::new(tokens).parse_program()
}
