//! Expression lexer: a single-pass cursor producing positioned tokens.

use std::sync::Arc;

use crate::expression::error::{ParseError, ParseErrorKind, ParseResult};
use crate::syntax::number::NumberParserRegistry;
use crate::syntax::token::{Token, TokenKind};

pub struct Lexer {
    text: Vec<char>,
    pos: usize,
    ch: Option<char>,
    numbers: Arc<NumberParserRegistry>,
}

impl Lexer {
    pub fn new(text: &str, numbers: Arc<NumberParserRegistry>) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let ch = chars.first().copied();
        Lexer {
            text: chars,
            pos: 0,
            ch,
            numbers,
        }
    }

    fn advance(&mut self) {
        if self.pos < self.text.len() {
            self.pos += 1;
        }
        self.ch = self.text.get(self.pos).copied();
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.ch, Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn is_identifier_start(c: char) -> bool {
        c.is_alphabetic() || c == '_' || c == '@'
    }

    fn is_identifier_part(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    /// Produce the next token; fails with the offending position on any
    /// unrecognized character or malformed literal shape.
    pub fn next_token(&mut self) -> ParseResult<Token> {
        self.skip_whitespace();
        let start = self.pos;

        let c = match self.ch {
            Some(c) => c,
            None => return Ok(Token::new(TokenKind::End, "", start)),
        };

        // The sigil aliases lex as complete one-character identifiers.
        if matches!(c, '$' | '^' | '~') {
            self.advance();
            return Ok(Token::new(TokenKind::Identifier, c.to_string(), start));
        }

        if Self::is_identifier_start(c) {
            let mut text = String::new();
            text.push(c);
            self.advance();
            while matches!(self.ch, Some(c) if Self::is_identifier_part(c)) {
                text.push(self.ch.unwrap());
                self.advance();
            }
            return Ok(Token::new(TokenKind::Identifier, text, start));
        }

        if c == '"' || c == '\'' {
            return self.read_string(c, start);
        }

        if c.is_ascii_digit() {
            return self.read_number(start);
        }

        let kind = match c {
            '!' => self.two_char('=', TokenKind::NotEqual, TokenKind::Exclamation),
            '%' => self.single(TokenKind::Percent),
            '&' => self.two_char('&', TokenKind::DoubleAmp, TokenKind::Amp),
            '(' => self.single(TokenKind::OpenParen),
            ')' => self.single(TokenKind::CloseParen),
            '*' => self.single(TokenKind::Asterisk),
            '+' => self.single(TokenKind::Plus),
            ',' => self.single(TokenKind::Comma),
            '-' => self.single(TokenKind::Minus),
            '.' => self.single(TokenKind::Dot),
            '/' => self.single(TokenKind::Slash),
            ':' => self.single(TokenKind::Colon),
            '?' => self.single(TokenKind::Question),
            '[' => self.single(TokenKind::OpenBracket),
            ']' => self.single(TokenKind::CloseBracket),
            '|' => self.two_char('|', TokenKind::DoubleBar, TokenKind::Bar),
            '=' => self.two_char('=', TokenKind::DoubleEqual, TokenKind::Equal),
            '<' => {
                self.advance();
                match self.ch {
                    Some('=') => {
                        self.advance();
                        TokenKind::LessEqual
                    }
                    Some('>') => {
                        self.advance();
                        TokenKind::LessGreater
                    }
                    Some('<') => {
                        self.advance();
                        TokenKind::ShiftLeft
                    }
                    _ => TokenKind::LessThan,
                }
            }
            '>' => {
                self.advance();
                match self.ch {
                    Some('=') => {
                        self.advance();
                        TokenKind::GreaterEqual
                    }
                    Some('>') => {
                        self.advance();
                        TokenKind::ShiftRight
                    }
                    _ => TokenKind::GreaterThan,
                }
            }
            other => {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidCharacter(other),
                    start,
                ))
            }
        };

        let text: String = self.text[start..self.pos].iter().collect();
        Ok(Token::new(kind, text, start))
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn two_char(&mut self, second: char, double: TokenKind, single: TokenKind) -> TokenKind {
        self.advance();
        if self.ch == Some(second) {
            self.advance();
            double
        } else {
            single
        }
    }

    /// Read a quoted string; a doubled quote is the escape for the quote
    /// character itself.
    fn read_string(&mut self, quote: char, start: usize) -> ParseResult<Token> {
        self.advance();
        let mut value = String::new();
        loop {
            match self.ch {
                None => {
                    return Err(ParseError::new(ParseErrorKind::UnterminatedString, start));
                }
                Some(c) if c == quote => {
                    self.advance();
                    if self.ch == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(TokenKind::StringLiteral { quote }, value, start))
    }

    /// Read an integer or real literal, including any registered numeric
    /// suffix characters, which stay in the token text for the number
    /// parser registry to resolve.
    fn read_number(&mut self, start: usize) -> ParseResult<Token> {
        let mut kind = TokenKind::IntegerLiteral;
        while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.ch == Some('.')
            && matches!(self.text.get(self.pos + 1), Some(c) if c.is_ascii_digit())
        {
            kind = TokenKind::RealLiteral;
            self.advance();
            while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.ch, Some('E') | Some('e')) {
            kind = TokenKind::RealLiteral;
            self.advance();
            if matches!(self.ch, Some('+') | Some('-')) {
                self.advance();
            }
            if !matches!(self.ch, Some(c) if c.is_ascii_digit()) {
                return Err(ParseError::new(ParseErrorKind::DigitExpected, self.pos));
            }
            while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        while matches!(self.ch, Some(c) if self.numbers.is_suffix_char(c)) {
            self.advance();
        }
        let text: String = self.text[start..self.pos].iter().collect();
        Ok(Token::new(kind, text, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(text: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(text, NumberParserRegistry::with_defaults());
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            let done = tok.is_end();
            out.push(tok);
            if done {
                break;
            }
        }
        out
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex_all(text).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_maximal_munch() {
        assert_eq!(
            kinds("!= && <= <> == >= || >> << < > = ! & |"),
            vec![
                TokenKind::NotEqual,
                TokenKind::DoubleAmp,
                TokenKind::LessEqual,
                TokenKind::LessGreater,
                TokenKind::DoubleEqual,
                TokenKind::GreaterEqual,
                TokenKind::DoubleBar,
                TokenKind::ShiftRight,
                TokenKind::ShiftLeft,
                TokenKind::LessThan,
                TokenKind::GreaterThan,
                TokenKind::Equal,
                TokenKind::Exclamation,
                TokenKind::Amp,
                TokenKind::Bar,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_sigils_are_single_identifiers() {
        let toks = lex_all("$x ^ ~y");
        assert_eq!(toks[0].text, "$");
        assert_eq!(toks[1].text, "x");
        assert_eq!(toks[2].text, "^");
        assert_eq!(toks[3].text, "~");
        assert_eq!(toks[4].text, "y");
    }

    #[test]
    fn test_substitution_identifiers() {
        let toks = lex_all("@0 @12");
        assert_eq!(toks[0].text, "@0");
        assert_eq!(toks[1].text, "@12");
    }

    #[test]
    fn test_string_escapes() {
        let toks = lex_all(r#""he said ""hi""" 'it''s'"#);
        assert_eq!(toks[0].text, "he said \"hi\"");
        assert_eq!(toks[0].kind, TokenKind::StringLiteral { quote: '"' });
        assert_eq!(toks[1].text, "it's");
        assert_eq!(toks[1].kind, TokenKind::StringLiteral { quote: '\'' });
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("  \"abc", NumberParserRegistry::with_defaults());
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedString);
        assert_eq!(err.position, 2);
    }

    #[test]
    fn test_numbers_with_suffixes() {
        let toks = lex_all("123 1.5 2.5F 100L 7UB 1E5 1.5e-3 3M");
        let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            &texts[..8],
            &["123", "1.5", "2.5F", "100L", "7UB", "1E5", "1.5e-3", "3M"]
        );
        assert_eq!(toks[0].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[1].kind, TokenKind::RealLiteral);
        assert_eq!(toks[2].kind, TokenKind::RealLiteral);
        assert_eq!(toks[3].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[4].kind, TokenKind::IntegerLiteral);
        assert_eq!(toks[5].kind, TokenKind::RealLiteral);
        assert_eq!(toks[6].kind, TokenKind::RealLiteral);
        assert_eq!(toks[7].kind, TokenKind::RealLiteral);
    }

    #[test]
    fn test_dot_not_consumed_without_digit() {
        // "1.Foo" is member access on the literal, not a real literal.
        assert_eq!(
            kinds("1.Foo"),
            vec![
                TokenKind::IntegerLiteral,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::End
            ]
        );
    }

    #[test]
    fn test_exponent_requires_digit() {
        let mut lexer = Lexer::new("1E+", NumberParserRegistry::with_defaults());
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::DigitExpected);
    }

    #[test]
    fn test_bad_character_position() {
        let mut lexer = Lexer::new("a #", NumberParserRegistry::with_defaults());
        lexer.next_token().unwrap();
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidCharacter('#'));
        assert_eq!(err.position, 2);
    }

    #[test]
    fn test_positions() {
        let toks = lex_all("City = @0");
        assert_eq!(toks[0].pos, 0);
        assert_eq!(toks[1].pos, 5);
        assert_eq!(toks[2].pos, 7);
    }
}
