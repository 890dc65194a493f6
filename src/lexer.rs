use std::collections::VecDeque;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    LineBegin,
    TokenStart,
}

enum StepOutcome<'a> {
    Emit(Token<'a>),
    Continue,
}

/// Streaming lexer over a source buffer.
///
/// Lexing never fails: unknown characters, unterminated strings, and
/// inconsistent dedents become `TokenKind::Invalid` tokens that the parser
/// reports when it reaches them.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    line_start: usize,
    indent_stack: Vec<usize>,
    pending_tokens: VecDeque<Token<'a>>,
    state: LexerState,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            line_start: 0,
            indent_stack: vec![0],
            pending_tokens: VecDeque::new(),
            state: LexerState::LineBegin,
        }
    }

    pub fn next_token(&mut self) -> Token<'a> {
        loop {
            if let Some(token) = self.pending_tokens.pop_front() {
                return token;
            }

            match self.step_state() {
                StepOutcome::Emit(token) => return token,
                StepOutcome::Continue => continue,
            }
        }
    }

    fn step_state(&mut self) -> StepOutcome<'a> {
        match self.state {
            LexerState::LineBegin => {
                self.handle_indentation();
                self.state = LexerState::TokenStart;
                StepOutcome::Continue
            }
            LexerState::TokenStart => {
                self.skip_whitespace();

                if self.peek_char() == Some('#') {
                    self.consume_while(|c| c != '\n');
                    return StepOutcome::Continue;
                }

                if self.peek_char().is_none() {
                    return self.handle_eof();
                }

                StepOutcome::Emit(self.read_token())
            }
        }
    }

    /// Measure the leading indentation of a line and queue Indent/Dedent
    /// tokens against the column stack. Blank lines and comment-only lines
    /// leave the stack untouched.
    fn handle_indentation(&mut self) {
        let level = self.consume_while(|c| c == ' ' || c == '\t');

        match self.peek_char() {
            Option::None | Some('\n') | Some('\r') | Some('#') => return,
            _ => {}
        }

        let current = self.current_indent();
        let span = self.empty_span();

        if level > current {
            self.indent_stack.push(level);
            self.pending_tokens
                .push_back(Token::new(TokenKind::Indent, span));
        } else if level < current {
            while self.current_indent() > level && self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                self.pending_tokens
                    .push_back(Token::new(TokenKind::Dedent, span));
            }
            if self.current_indent() != level {
                self.pending_tokens.push_back(Token::new(
                    TokenKind::Invalid("Indentation error".to_string()),
                    span,
                ));
            }
        }
    }

    fn handle_eof(&mut self) -> StepOutcome<'a> {
        // Close every open block before the final EOF token.
        let span = self.empty_span();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending_tokens
                .push_back(Token::new(TokenKind::Dedent, span));
        }
        if !self.pending_tokens.is_empty() {
            return StepOutcome::Continue;
        }

        StepOutcome::Emit(Token::new(TokenKind::EOF, span))
    }

    fn read_token(&mut self) -> Token<'a> {
        let start = self.pos;
        let line = self.line;
        let column = self.column();

        let Some(ch) = self.peek_char() else {
            return Token::new(TokenKind::EOF, self.empty_span());
        };

        let kind = match ch {
            '\n' => {
                self.consume_char();
                self.state = LexerState::LineBegin;
                let kind = TokenKind::Newline;
                let span = self.span_from(start, line, column);
                self.line += 1;
                self.line_start = self.pos;
                return Token::new(kind, span);
            }
            '"' | '\'' => self.read_string(ch),
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_alphabetic() || c == '_' => self.read_identifier(start),
            _ => self.read_operator(ch),
        };

        Token::new(kind, self.span_from(start, line, column))
    }

    fn read_operator(&mut self, ch: char) -> TokenKind<'a> {
        self.consume_char();
        match ch {
            '+' => self.two_char_or('=', TokenKind::PlusAssign, TokenKind::Plus),
            '-' => self.two_char_or('=', TokenKind::MinusAssign, TokenKind::Minus),
            '*' => self.two_char_or('*', TokenKind::Power, TokenKind::Multiply),
            '/' => TokenKind::Divide,
            '%' => TokenKind::Modulo,
            '=' => self.two_char_or('=', TokenKind::Equal, TokenKind::Assign),
            '!' => {
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    TokenKind::NotEqual
                } else {
                    TokenKind::Invalid("Unexpected character '!'".to_string())
                }
            }
            '<' => self.two_char_or('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.two_char_or('=', TokenKind::GreaterEqual, TokenKind::Greater),
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            other => TokenKind::Invalid(format!("Unexpected character '{other}'")),
        }
    }

    fn two_char_or(
        &mut self,
        second: char,
        double: TokenKind<'a>,
        single: TokenKind<'a>,
    ) -> TokenKind<'a> {
        if self.peek_char() == Some(second) {
            self.consume_char();
            double
        } else {
            single
        }
    }

    fn read_identifier(&mut self, start: usize) -> TokenKind<'a> {
        self.consume_while(|c| c.is_alphanumeric() || c == '_');
        let ident = &self.input[start..self.pos];

        match ident {
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "class" => TokenKind::Class,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "as" => TokenKind::As,
            "try" => TokenKind::Try,
            "except" => TokenKind::Except,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            _ => TokenKind::Identifier(ident),
        }
    }

    fn read_number(&mut self, start: usize) -> TokenKind<'a> {
        self.consume_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.')
            && self.peek_next().is_some_and(|c| c.is_ascii_digit())
        {
            self.consume_char();
            self.consume_while(|c| c.is_ascii_digit());
        }

        let literal = &self.input[start..self.pos];
        match literal.parse::<f64>() {
            Ok(value) => TokenKind::Number(value),
            Err(_) => TokenKind::Invalid(format!("Invalid number literal '{literal}'")),
        }
    }

    fn read_string(&mut self, quote: char) -> TokenKind<'a> {
        self.consume_char();
        let mut value = String::new();

        loop {
            match self.peek_char() {
                Option::None => {
                    return TokenKind::Invalid("Unterminated string".to_string());
                }
                Some(c) if c == quote => {
                    self.consume_char();
                    return TokenKind::Str(value);
                }
                Some('\\') => {
                    self.consume_char();
                    let Some(escaped) = self.consume_char() else {
                        return TokenKind::Invalid("Unterminated string".to_string());
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        other => value.push(other),
                    }
                }
                Some('\n') => {
                    // Strings may span physical lines; only EOF unterminates.
                    self.consume_char();
                    self.line += 1;
                    self.line_start = self.pos;
                    value.push('\n');
                }
                Some(c) => {
                    self.consume_char();
                    value.push(c);
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(|c| c == ' ' || c == '\t' || c == '\r');
    }

    fn consume_while<P>(&mut self, keep: P) -> usize
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !keep(c) {
                break;
            }
            self.consume_char();
        }
        self.pos - start
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn column(&self) -> usize {
        self.pos - self.line_start + 1
    }

    fn empty_span(&self) -> Span {
        Span {
            start: self.pos,
            end: self.pos,
            line: self.line,
            column: self.column(),
        }
    }

    fn span_from(&self, start: usize, line: usize, column: usize) -> Span {
        Span {
            start,
            end: self.pos,
            line,
            column,
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_token())
    }
}

pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let is_eof = matches!(token.kind, TokenKind::EOF);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    tokens
}
