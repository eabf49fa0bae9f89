//! The lexer: source text to a token stream with positions.

use sable_core::{Error, Result, SourceLocation};

use crate::token::{Token, TokenKind};

/// Tokenizes a complete chunk.
pub fn tokenize(source: &str, chunk_name: &str) -> Result<Vec<Token>> {
    Lexer::new(source, chunk_name).run()
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    chunk_name: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &str, chunk_name: &'a str) -> Lexer<'a> {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            chunk_name,
        }
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.chunk_name, self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };

            let kind = if c.is_ascii_digit() {
                self.number()?
            } else if c == '_' || c.is_alphabetic() {
                self.name()
            } else if c == '"' {
                self.string()?
            } else {
                self.operator()?
            };

            tokens.push(Token { kind, line, column });
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.location();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(Error::syntax("unterminated block comment", start))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn name(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        TokenKind::keyword(&text).unwrap_or(TokenKind::Name(text))
    }

    fn number(&mut self) -> Result<TokenKind> {
        let start = self.location();

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(Error::syntax("malformed hexadecimal literal", start));
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| Error::syntax("hexadecimal literal out of range", start.clone()))?;
            return Ok(TokenKind::Int(value));
        }

        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '.' && !is_float && self.peek_at(1).map_or(false, |d| d.is_ascii_digit())
            {
                is_float = true;
                text.push(c);
                self.bump();
            } else if (c == 'e' || c == 'E')
                && self.peek_at(1).map_or(false, |d| {
                    d.is_ascii_digit() || d == '+' || d == '-'
                })
            {
                is_float = true;
                text.push(c);
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    text.push(self.bump().expect("sign peeked"));
                }
            } else {
                break;
            }
        }

        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| Error::syntax("malformed number literal", start))?;
            Ok(TokenKind::Float(value))
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| Error::syntax("integer literal out of range", start))?;
            Ok(TokenKind::Int(value))
        }
    }

    fn string(&mut self) -> Result<TokenKind> {
        let start = self.location();
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(TokenKind::Str(text)),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('0') => text.push('\0'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(other) => {
                        return Err(Error::syntax(
                            format!("invalid escape sequence '\\{other}'"),
                            start,
                        ))
                    }
                    None => return Err(Error::syntax("unterminated string literal", start)),
                },
                Some('\n') | None => {
                    return Err(Error::syntax("unterminated string literal", start))
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn operator(&mut self) -> Result<TokenKind> {
        let start = self.location();
        let c = self.bump().expect("operator character peeked");
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '#' => TokenKind::Hash,
            '~' => TokenKind::Tilde,
            '.' => {
                if self.eat('.') {
                    if self.eat('.') {
                        TokenKind::Ellipsis
                    } else {
                        return Err(Error::syntax("unexpected '..'", start));
                    }
                } else {
                    TokenKind::Dot
                }
            }
            '+' => {
                if self.eat('+') {
                    TokenKind::PlusPlus
                } else if self.eat('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    TokenKind::MinusMinus
                } else if self.eat('=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.eat('*') {
                    TokenKind::StarStar
                } else if self.eat('=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    TokenKind::PercentAssign
                } else {
                    TokenKind::Percent
                }
            }
            '=' => {
                if self.eat('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else if self.eat('<') {
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else if self.eat('>') {
                    TokenKind::Shr
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            '^' => TokenKind::Caret,
            other => {
                return Err(Error::syntax(
                    format!("unexpected character '{other}'"),
                    start,
                ))
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, "test")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn numbers_and_names() {
        assert_eq!(
            kinds("let x = 42"),
            vec![
                TokenKind::KwLet,
                TokenKind::Name("x".into()),
                TokenKind::Assign,
                TokenKind::Int(42),
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("0x1F")[0], TokenKind::Int(31));
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("a += 1; b++ ** <= != << ..."),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::PlusAssign,
                TokenKind::Int(1),
                TokenKind::Semi,
                TokenKind::Name("b".into()),
                TokenKind::PlusPlus,
                TokenKind::StarStar,
                TokenKind::Le,
                TokenKind::NotEq,
                TokenKind::Shl,
                TokenKind::Ellipsis,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n""#)[0],
            TokenKind::Str("a\tb\n".to_string())
        );
    }

    #[test]
    fn comments_are_skipped_and_positions_tracked() {
        let tokens = tokenize("// line\n/* block\nstill */ x", "test").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Name("x".into()));
        assert_eq!(tokens[0].line, 3);
    }

    #[test]
    fn unterminated_string_reports_location() {
        let err = tokenize("let s = \"oops", "chunk").unwrap_err();
        assert_eq!(err.kind, sable_core::ErrorKind::Syntax);
        let loc = err.location.unwrap();
        assert_eq!(loc.source, "chunk");
        assert_eq!(loc.line, 1);
    }
}
