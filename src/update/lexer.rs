//! Tokenizer for SPARQL update statements.
//!
//! Produces a flat token stream with byte spans. String escapes are
//! decoded here; prefixed names and relative IRIs are resolved by the
//! parser, which knows the prologue.

use crate::error::ParseError;

/// Byte-level source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `<...>` contents, unresolved.
    Iri(String),
    /// `prefix:local`; the prefix may be empty.
    PrefixedName { prefix: String, local: String },
    /// `_:label`
    Blank(String),
    /// `?name` or `$name`
    Var(String),
    /// A quoted string, escapes decoded.
    Str(String),
    /// `@tag` following a string.
    LangTag(String),
    DoubleCaret,
    Integer(String),
    Decimal(String),
    Double(String),
    /// A bare word: keyword, `a`, `true`, `false`.
    Word(String),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Semicolon,
    Comma,
    /// Any other punctuation (operators, path syntax).
    Punct(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Up to 40 characters of input starting at `offset`, for error messages.
pub fn fragment_at(input: &str, offset: usize) -> String {
    let start = offset.min(input.len());
    let mut end = start;
    for (count, (i, c)) in input[start..].char_indices().enumerate() {
        if count == 40 || c == '\n' {
            break;
        }
        end = start + i + c.len_utf8();
    }
    input[start..end].to_string()
}

fn syntax(input: &str, offset: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        message: message.into(),
        fragment: fragment_at(input, offset),
        offset,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Tokenize an update statement.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    Lexer {
        input,
        chars: input.char_indices().collect(),
        pos: 0,
    }
    .run()
}

struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Lexer<'_> {
    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_at(0)?;
        self.pos += 1;
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek_at(0).filter(|c| pred(*c)) {
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            // Skip whitespace and comments.
            while let Some(c) = self.peek_at(0) {
                if c.is_whitespace() {
                    self.pos += 1;
                } else if c == '#' {
                    self.take_while(|c| c != '\n');
                } else {
                    break;
                }
            }
            let start = self.offset();
            let Some(c) = self.peek_at(0) else { break };
            let kind = self.token(c, start)?;
            tokens.push(Token {
                kind,
                span: Span {
                    start,
                    end: self.offset(),
                },
            });
        }
        Ok(tokens)
    }

    fn token(&mut self, c: char, start: usize) -> Result<TokenKind, ParseError> {
        let single = |kind: TokenKind, lexer: &mut Self| {
            lexer.pos += 1;
            Ok(kind)
        };
        match c {
            '{' => single(TokenKind::LBrace, self),
            '}' => single(TokenKind::RBrace, self),
            '(' => single(TokenKind::LParen, self),
            ')' => single(TokenKind::RParen, self),
            '[' => single(TokenKind::LBracket, self),
            ']' => single(TokenKind::RBracket, self),
            ';' => single(TokenKind::Semicolon, self),
            ',' => single(TokenKind::Comma, self),
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number(start),
            '.' => single(TokenKind::Dot, self),
            '<' => Ok(self.iri_or_punct()),
            '"' | '\'' => self.string(c, start),
            '?' | '$' if self.peek_at(1).is_some_and(is_name_char) => {
                self.pos += 1;
                Ok(TokenKind::Var(self.take_while(is_name_char)))
            }
            '@' => {
                self.pos += 1;
                let tag = self.take_while(|c| c.is_ascii_alphanumeric() || c == '-');
                if tag.is_empty() {
                    return Err(syntax(self.input, start, "empty language tag"));
                }
                Ok(TokenKind::LangTag(tag))
            }
            '^' if self.peek_at(1) == Some('^') => {
                self.pos += 2;
                Ok(TokenKind::DoubleCaret)
            }
            '_' if self.peek_at(1) == Some(':') => {
                self.pos += 2;
                let label = self.name_with_dots();
                if label.is_empty() {
                    return Err(syntax(self.input, start, "empty blank node label"));
                }
                Ok(TokenKind::Blank(label))
            }
            '+' | '-' if self
                .peek_at(1)
                .is_some_and(|c| c.is_ascii_digit() || c == '.') =>
            {
                self.number(start)
            }
            c if c.is_ascii_digit() => self.number(start),
            ':' => {
                self.pos += 1;
                Ok(TokenKind::PrefixedName {
                    prefix: String::new(),
                    local: self.name_with_dots(),
                })
            }
            c if c.is_alphabetic() || c == '_' => {
                let word = self.take_while(is_name_char);
                if self.peek_at(0) == Some(':') {
                    self.pos += 1;
                    Ok(TokenKind::PrefixedName {
                        prefix: word,
                        local: self.name_with_dots(),
                    })
                } else {
                    Ok(TokenKind::Word(word))
                }
            }
            other => single(TokenKind::Punct(other), self),
        }
    }

    /// A name that may contain inner dots but never ends with one.
    fn name_with_dots(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek_at(0) {
            let inner_dot = c == '.' && self.peek_at(1).is_some_and(|n| is_name_char(n) || n == ':');
            if is_name_char(c) || c == ':' || c == '%' || inner_dot {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    fn iri_or_punct(&mut self) -> TokenKind {
        let mut ahead = 1;
        let mut iri = String::new();
        while let Some(c) = self.peek_at(ahead) {
            if c == '>' {
                self.pos += ahead + 1;
                return TokenKind::Iri(iri);
            }
            if c.is_whitespace() || c == '<' || c == '"' || c == '{' || c == '}' {
                break;
            }
            iri.push(c);
            ahead += 1;
        }
        self.pos += 1;
        TokenKind::Punct('<')
    }

    fn number(&mut self, start: usize) -> Result<TokenKind, ParseError> {
        let mut text = String::new();
        if let Some(sign) = self.peek_at(0).filter(|c| *c == '+' || *c == '-') {
            text.push(sign);
            self.pos += 1;
        }
        text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        let mut decimal = false;
        if self.peek_at(0) == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            decimal = true;
            self.pos += 1;
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }
        if let Some(e) = self.peek_at(0).filter(|c| *c == 'e' || *c == 'E') {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some('+' | '-')) {
                ahead = 2;
            }
            if self.peek_at(ahead).is_some_and(|c| c.is_ascii_digit()) {
                text.push(e);
                self.pos += 1;
                if ahead == 2 {
                    if let Some(sign) = self.bump() {
                        text.push(sign);
                    }
                }
                text.push_str(&self.take_while(|c| c.is_ascii_digit()));
                return Ok(TokenKind::Double(text));
            }
        }
        if text.trim_start_matches(['+', '-']).is_empty() {
            return Err(syntax(self.input, start, "malformed number"));
        }
        Ok(if decimal {
            TokenKind::Decimal(text)
        } else {
            TokenKind::Integer(text)
        })
    }

    fn string(&mut self, quote: char, start: usize) -> Result<TokenKind, ParseError> {
        let long = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if long { 3 } else { 1 };
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(syntax(self.input, start, "unterminated string"));
            };
            match c {
                '\\' => value.push(self.escape(start)?),
                c if c == quote && !long => break,
                c if c == quote && self.peek_at(0) == Some(quote) && self.peek_at(1) == Some(quote) => {
                    self.pos += 2;
                    break;
                }
                '\n' | '\r' if !long => {
                    return Err(syntax(self.input, start, "line break in short string"));
                }
                c => value.push(c),
            }
        }
        Ok(TokenKind::Str(value))
    }

    fn escape(&mut self, start: usize) -> Result<char, ParseError> {
        let escaped = match self.bump() {
            Some('t') => '\t',
            Some('b') => '\u{08}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('f') => '\u{0C}',
            Some('"') => '"',
            Some('\'') => '\'',
            Some('\\') => '\\',
            Some(u @ ('u' | 'U')) => {
                let len = if u == 'u' { 4 } else { 8 };
                let mut hex = String::new();
                for _ in 0..len {
                    match self.bump() {
                        Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                        _ => return Err(syntax(self.input, start, "invalid unicode escape")),
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| syntax(self.input, start, "invalid unicode code point"))?
            }
            _ => return Err(syntax(self.input, start, "invalid escape sequence")),
        };
        Ok(escaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            kinds("INSERT DATA { <http://ex.org/s> ex:p \"v\"@en . }"),
            vec![
                TokenKind::Word("INSERT".into()),
                TokenKind::Word("DATA".into()),
                TokenKind::LBrace,
                TokenKind::Iri("http://ex.org/s".into()),
                TokenKind::PrefixedName {
                    prefix: "ex".into(),
                    local: "p".into()
                },
                TokenKind::Str("v".into()),
                TokenKind::LangTag("en".into()),
                TokenKind::Dot,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn trailing_dot_is_not_part_of_name() {
        assert_eq!(
            kinds("ex:a.b ex:c."),
            vec![
                TokenKind::PrefixedName {
                    prefix: "ex".into(),
                    local: "a.b".into()
                },
                TokenKind::PrefixedName {
                    prefix: "ex".into(),
                    local: "c".into()
                },
                TokenKind::Dot,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("42 -7 3.14 1e10 2.5E-3 5."),
            vec![
                TokenKind::Integer("42".into()),
                TokenKind::Integer("-7".into()),
                TokenKind::Decimal("3.14".into()),
                TokenKind::Double("1e10".into()),
                TokenKind::Double("2.5E-3".into()),
                TokenKind::Integer("5".into()),
                TokenKind::Dot,
            ]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\tb" """multi
line""" "é""#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\tb".into()),
                TokenKind::Str("multi\nline".into()),
                TokenKind::Str("é".into()),
            ]
        );
    }

    #[test]
    fn variables_blanks_comments() {
        assert_eq!(
            kinds("?x $y _:b1 # comment\n ^^ <"),
            vec![
                TokenKind::Var("x".into()),
                TokenKind::Var("y".into()),
                TokenKind::Blank("b1".into()),
                TokenKind::DoubleCaret,
                TokenKind::Punct('<'),
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_offset() {
        match tokenize("INSERT DATA { <s> <p> \"open") {
            Err(ParseError::Syntax { offset, fragment, .. }) => {
                assert_eq!(offset, 22);
                assert!(fragment.starts_with("\"open"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn spans_cover_tokens() {
        let tokens = tokenize("  ?abc ").unwrap();
        assert_eq!(tokens[0].span, Span { start: 2, end: 6 });
    }
}
