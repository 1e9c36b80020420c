// Recursive-descent parser for the query language

use crate::core::errors::BridgeError;
use crate::filter::ast::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Pipe,
    EqEq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
}

fn lex_error(msg: impl Into<String>) -> BridgeError {
    BridgeError::FilterFailed(format!("parse error: {}", msg.into()))
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, BridgeError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '(' => tokens.push(self.single(Token::LParen)),
                ')' => tokens.push(self.single(Token::RParen)),
                '[' => tokens.push(self.single(Token::LBracket)),
                ']' => tokens.push(self.single(Token::RBracket)),
                '{' => tokens.push(self.single(Token::LBrace)),
                '}' => tokens.push(self.single(Token::RBrace)),
                ',' => tokens.push(self.single(Token::Comma)),
                ':' => tokens.push(self.single(Token::Colon)),
                '.' => tokens.push(self.single(Token::Dot)),
                '|' => tokens.push(self.single(Token::Pipe)),
                '+' => tokens.push(self.single(Token::Plus)),
                '-' => tokens.push(self.single(Token::Minus)),
                '*' => tokens.push(self.single(Token::Star)),
                '/' => tokens.push(self.single(Token::Slash)),
                '%' => tokens.push(self.single(Token::Percent)),
                '^' => tokens.push(self.single(Token::Caret)),
                '=' => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'=').is_some() {
                        tokens.push(Token::EqEq);
                    } else {
                        return Err(lex_error("expected '==' "));
                    }
                }
                '!' => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'=').is_some() {
                        tokens.push(Token::NotEq);
                    } else {
                        return Err(lex_error("expected '!='"));
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'=').is_some() {
                        tokens.push(Token::Gte);
                    } else {
                        tokens.push(Token::Gt);
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.chars.next_if_eq(&'=').is_some() {
                        tokens.push(Token::Lte);
                    } else {
                        tokens.push(Token::Lt);
                    }
                }
                '"' => tokens.push(self.string()?),
                c if c.is_ascii_digit() => tokens.push(self.number()?),
                c if c.is_ascii_alphabetic() || c == '_' => tokens.push(self.ident()),
                other => return Err(lex_error(format!("unexpected character '{}'", other))),
            }
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn string(&mut self) -> Result<Token, BridgeError> {
        self.chars.next(); // opening quote
        let mut value = String::new();
        loop {
            match self.chars.next() {
                None => return Err(lex_error("unterminated string")),
                Some('"') => return Ok(Token::Str(value)),
                Some('\\') => match self.chars.next() {
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some('/') => value.push('/'),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('b') => value.push('\u{0008}'),
                    Some('f') => value.push('\u{000C}'),
                    Some('u') => {
                        let mut code = String::new();
                        for _ in 0..4 {
                            code.push(self.chars.next().ok_or_else(|| {
                                lex_error("truncated unicode escape")
                            })?);
                        }
                        let cp = u32::from_str_radix(&code, 16)
                            .map_err(|_| lex_error("invalid unicode escape"))?;
                        value.push(
                            char::from_u32(cp).ok_or_else(|| lex_error("invalid code point"))?,
                        );
                    }
                    Some(other) => {
                        return Err(lex_error(format!("invalid escape '\\{}'", other)))
                    }
                    None => return Err(lex_error("unterminated escape")),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Token, BridgeError> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' {
                text.push(c);
                self.chars.next();
                // allow an exponent sign right after e/E
                if (c == 'e' || c == 'E') && matches!(self.chars.peek(), Some('+') | Some('-')) {
                    text.push(self.chars.next().unwrap_or('+'));
                }
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| lex_error(format!("invalid number '{}'", text)))
    }

    fn ident(&mut self) -> Token {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(text)
    }
}

/// Parse a query expression into its AST.
pub fn parse(source: &str) -> Result<Expr, BridgeError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.pipe()?;
    if parser.pos != parser.tokens.len() {
        return Err(lex_error(format!(
            "unexpected trailing input at token {}",
            parser.pos
        )));
    }
    Ok(expr)
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

    fn expect(&mut self, expected: Token) -> Result<(), BridgeError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(lex_error(format!(
                "expected {:?}, found {:?}",
                expected, token
            ))),
            None => Err(lex_error(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn pipe(&mut self) -> Result<Expr, BridgeError> {
        let mut stages = vec![self.or_expr()?];
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.next();
            stages.push(self.or_expr()?);
        }
        if stages.len() == 1 {
            Ok(stages.pop().unwrap_or(Expr::Null))
        } else {
            Ok(Expr::Pipe(stages))
        }
    }

    fn or_expr(&mut self) -> Result<Expr, BridgeError> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("or") {
            self.next();
            let right = self.and_expr()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, BridgeError> {
        let mut left = self.not_expr()?;
        while self.peek_keyword("and") {
            self.next();
            let right = self.not_expr()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, BridgeError> {
        // `not in` belongs to the comparison below, so only treat `not` as a
        // prefix when it is not immediately followed by `in`.
        if self.peek_keyword("not")
            && !matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(w)) if w == "in")
        {
            self.next();
            let inner = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, BridgeError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => Some(BinaryOp::Eq),
            Some(Token::NotEq) => Some(BinaryOp::Ne),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Gte) => Some(BinaryOp::Gte),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Lte) => Some(BinaryOp::Lte),
            Some(Token::Ident(w)) if w == "in" => Some(BinaryOp::In),
            Some(Token::Ident(w)) if w == "not" => {
                if matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(w2)) if w2 == "in") {
                    Some(BinaryOp::NotIn)
                } else {
                    None
                }
            }
            _ => None,
        };

        match op {
            Some(BinaryOp::NotIn) => {
                self.next(); // not
                self.next(); // in
                let right = self.additive()?;
                Ok(Expr::Binary(BinaryOp::NotIn, Box::new(left), Box::new(right)))
            }
            Some(op) => {
                self.next();
                let right = self.additive()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn additive(&mut self) -> Result<Expr, BridgeError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, BridgeError> {
        let mut left = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.next();
            let right = self.power()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn power(&mut self) -> Result<Expr, BridgeError> {
        let base = self.unary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.next();
            // right-associative
            let exponent = self.power()?;
            return Ok(Expr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, BridgeError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.next();
            let inner = self.unary()?;
            // fold negated literals so `-3` round-trips as a number
            if let Expr::Number(n) = inner {
                return Ok(Expr::Number(-n));
            }
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, BridgeError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Dot) => {
                self.pos -= 1;
                self.prop()
            }
            Some(Token::LParen) => {
                let inner = self.pipe()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Token::RBracket)) {
                    loop {
                        items.push(self.pipe()?);
                        if matches!(self.peek(), Some(Token::Comma)) {
                            self.next();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Some(Token::LBrace) => self.object_or_param(),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                name => {
                    if matches!(self.peek(), Some(Token::LParen)) {
                        self.next();
                        let mut args = Vec::new();
                        if !matches!(self.peek(), Some(Token::RParen)) {
                            loop {
                                args.push(self.pipe()?);
                                if matches!(self.peek(), Some(Token::Comma)) {
                                    self.next();
                                } else {
                                    break;
                                }
                            }
                        }
                        self.expect(Token::RParen)?;
                        if name == "get" && args.is_empty() {
                            return Ok(Expr::Prop(vec![]));
                        }
                        Ok(Expr::Call(name.to_string(), args))
                    } else {
                        Err(lex_error(format!(
                            "bare identifier '{}' (did you mean '.{0}' or '{0}(...)'?)",
                            name
                        )))
                    }
                }
            },
            Some(other) => Err(lex_error(format!("unexpected token {:?}", other))),
            None => Err(lex_error("unexpected end of input")),
        }
    }

    fn prop(&mut self) -> Result<Expr, BridgeError> {
        let mut path = Vec::new();
        while matches!(self.peek(), Some(Token::Dot)) {
            self.next();
            match self.next() {
                Some(Token::Ident(name)) => path.push(name),
                Some(Token::Str(name)) => path.push(name),
                Some(other) => {
                    return Err(lex_error(format!(
                        "expected property name after '.', found {:?}",
                        other
                    )))
                }
                None => return Err(lex_error("expected property name after '.'")),
            }
        }
        Ok(Expr::Prop(path))
    }

    /// `{name}` with no colon is a parameter placeholder; anything else is an
    /// object constructor.
    fn object_or_param(&mut self) -> Result<Expr, BridgeError> {
        if matches!(self.peek(), Some(Token::RBrace)) {
            self.next();
            return Ok(Expr::Object(vec![]));
        }

        if let (Some(Token::Ident(name)), Some(Token::RBrace)) =
            (self.tokens.get(self.pos).cloned(), self.tokens.get(self.pos + 1))
        {
            self.next();
            self.next();
            return Ok(Expr::Param(name));
        }

        let mut pairs = Vec::new();
        loop {
            let key = match self.next() {
                Some(Token::Ident(name)) => name,
                Some(Token::Str(name)) => name,
                Some(other) => {
                    return Err(lex_error(format!("expected object key, found {:?}", other)))
                }
                None => return Err(lex_error("expected object key")),
            };
            self.expect(Token::Colon)?;
            let value = self.pipe()?;
            pairs.push((key, value));
            if matches!(self.peek(), Some(Token::Comma)) {
                self.next();
            } else {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Object(pairs))
    }
}
