//! Table-driven lexer
//!
//! The lexer is configured at construction with a table mapping literal
//! lexemes to token tags; the driver installs the keywords and operator
//! punctuators, which keeps the grammar out of the scanner. Structural
//! punctuation (parens, braces, separators) is built in.
//!
//! Tokens never own text: they carry byte spans into the original source.
//! Unrecognized input produces an `Unknown` token instead of failing, so
//! the parser can report it with a proper diagnostic. The EOF token is
//! idempotent.

use std::collections::HashMap;

/// Closed set of token tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenTag {
    // Keywords (driver-registered)
    KwVar,
    KwIf,
    KwElse,
    KwWhile,
    KwBreak,
    KwContinue,
    KwReturn,
    KwFunction,
    KwPrototype,
    KwThis,
    KwNew,
    KwVoid,
    KwTypeof,
    KwUndefined,
    KwNull,
    KwTrue,
    KwFalse,

    // Operator punctuators (driver-registered)
    Percent,
    Star,
    Slash,
    Plus,
    Minus,
    Bang,
    EqEq,
    BangEq,
    StrictEq,
    StrictBangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AmpAmp,
    PipePipe,
    Assign,
    PercentAssign,
    StarAssign,
    SlashAssign,
    PlusAssign,
    MinusAssign,

    // Structural punctuation (built in)
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,

    // Literal classes
    Int,
    Float,
    Str,
    Ident,

    Eof,
    /// Lex-error sentinel; the parser reports it with its span.
    Unknown,
}

/// One token: a tag plus a byte span into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub tag: TokenTag,
    pub start: usize,
    pub len: usize,
    pub line: u32,
    pub col: u32,
}

impl Token {
    /// Slice the raw lexeme out of the source this token was produced from.
    pub fn lexeme<'s>(&self, src: &'s str) -> &'s str {
        &src[self.start..self.start + self.len]
    }
}

/// Driver-installed lexeme table.
#[derive(Debug, Default)]
pub struct LexTable {
    keywords: HashMap<String, TokenTag>,
    /// Operator lexemes, longest first so `===` wins over `==` and `=`.
    operators: Vec<(String, TokenTag)>,
}

impl LexTable {
    pub fn new() -> Self {
        LexTable::default()
    }

    /// Register a keyword or operator punctuator.
    pub fn add(&mut self, lexeme: &str, tag: TokenTag) {
        let first = lexeme.as_bytes().first().copied().unwrap_or(0);
        if first.is_ascii_alphabetic() || first == b'_' {
            self.keywords.insert(lexeme.to_string(), tag);
        } else {
            self.operators.push((lexeme.to_string(), tag));
            self.operators.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        }
    }

    fn keyword(&self, ident: &str) -> Option<TokenTag> {
        self.keywords.get(ident).copied()
    }

    /// Longest operator matching the input at `pos`.
    fn match_operator(&self, src: &[u8], pos: usize) -> Option<(usize, TokenTag)> {
        for (lexeme, tag) in &self.operators {
            if src[pos..].starts_with(lexeme.as_bytes()) {
                return Some((lexeme.len(), *tag));
            }
        }
        None
    }
}

/// Restartable token stream over one source buffer.
pub struct Lexer<'a> {
    src: &'a [u8],
    table: &'a LexTable,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, table: &'a LexTable) -> Self {
        Lexer {
            src: source.as_bytes(),
            table,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    #[inline]
    fn peek_next(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while let Some(c) = self.advance() {
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.peek_next() == Some(b'*') => {
                    self.advance();
                    self.advance();
                    while let Some(c) = self.advance() {
                        if c == b'*' && self.peek() == Some(b'/') {
                            self.advance();
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn token(&self, tag: TokenTag, start: usize, line: u32, col: u32) -> Token {
        Token {
            tag,
            start,
            len: self.pos - start,
            line,
            col,
        }
    }

    /// Produce the next token. Returns `Eof` forever once the input ends.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let (start, line, col) = (self.pos, self.line, self.col);

        let Some(c) = self.peek() else {
            return Token {
                tag: TokenTag::Eof,
                start,
                len: 0,
                line,
                col,
            };
        };

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            return self.read_identifier(start, line, col);
        }
        if c.is_ascii_digit() {
            return self.read_number(start, line, col);
        }
        if c == b'"' {
            return self.read_string(start, line, col);
        }

        // Structural punctuation first, then the installed operator table.
        let structural = match c {
            b'(' => Some(TokenTag::LParen),
            b')' => Some(TokenTag::RParen),
            b'{' => Some(TokenTag::LBrace),
            b'}' => Some(TokenTag::RBrace),
            b'[' => Some(TokenTag::LBracket),
            b']' => Some(TokenTag::RBracket),
            b',' => Some(TokenTag::Comma),
            b'.' => Some(TokenTag::Dot),
            b':' => Some(TokenTag::Colon),
            b';' => Some(TokenTag::Semicolon),
            _ => None,
        };
        if let Some(tag) = structural {
            self.advance();
            return self.token(tag, start, line, col);
        }

        if let Some((len, tag)) = self.table.match_operator(self.src, self.pos) {
            for _ in 0..len {
                self.advance();
            }
            return self.token(tag, start, line, col);
        }

        self.advance();
        self.token(TokenTag::Unknown, start, line, col)
    }

    fn read_identifier(&mut self, start: usize, line: u32, col: u32) -> Token {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' {
                self.advance();
            } else {
                break;
            }
        }
        let ident = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        let tag = self.table.keyword(ident).unwrap_or(TokenTag::Ident);
        self.token(tag, start, line, col)
    }

    /// Integers and floats are distinguished by the presence of `.`.
    fn read_number(&mut self, start: usize, line: u32, col: u32) -> Token {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        let mut tag = TokenTag::Int;
        if self.peek() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            tag = TokenTag::Float;
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.token(tag, start, line, col)
    }

    /// Double-quoted string with standard escapes; an unterminated string
    /// becomes an `Unknown` token ending at end of line or end of input.
    fn read_string(&mut self, start: usize, line: u32, col: u32) -> Token {
        self.advance(); // opening quote

        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return self.token(TokenTag::Unknown, start, line, col);
                }
                Some(b'"') => {
                    self.advance();
                    return self.token(TokenTag::Str, start, line, col);
                }
                Some(b'\\') => {
                    self.advance();
                    if matches!(self.peek(), None | Some(b'\n')) {
                        return self.token(TokenTag::Unknown, start, line, col);
                    }
                    self.advance();
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }
}

/// Install the source language's keywords and operators into a table.
///
/// This is what the driver registers at startup; tests use it directly.
pub fn default_lexicals(table: &mut LexTable) {
    use TokenTag::*;
    let entries: &[(&str, TokenTag)] = &[
        ("var", KwVar),
        ("if", KwIf),
        ("else", KwElse),
        ("while", KwWhile),
        ("break", KwBreak),
        ("continue", KwContinue),
        ("return", KwReturn),
        ("function", KwFunction),
        ("prototype", KwPrototype),
        ("this", KwThis),
        ("new", KwNew),
        ("void", KwVoid),
        ("typeof", KwTypeof),
        ("undefined", KwUndefined),
        ("null", KwNull),
        ("true", KwTrue),
        ("false", KwFalse),
        ("%", Percent),
        ("*", Star),
        ("/", Slash),
        ("+", Plus),
        ("-", Minus),
        ("!", Bang),
        ("==", EqEq),
        ("!=", BangEq),
        ("===", StrictEq),
        ("!==", StrictBangEq),
        ("<", Lt),
        ("<=", Le),
        (">", Gt),
        (">=", Ge),
        ("&&", AmpAmp),
        ("||", PipePipe),
        ("=", Assign),
        ("%=", PercentAssign),
        ("*=", StarAssign),
        ("/=", SlashAssign),
        ("+=", PlusAssign),
        ("-=", MinusAssign),
    ];
    for (lexeme, tag) in entries {
        table.add(lexeme, *tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<(TokenTag, String)> {
        let mut table = LexTable::new();
        default_lexicals(&mut table);
        let mut lexer = Lexer::new(src, &table);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token();
            if tok.tag == TokenTag::Eof {
                break;
            }
            out.push((tok.tag, tok.lexeme(src).to_string()));
        }
        out
    }

    #[test]
    fn test_numbers() {
        let toks = lex_all("42 3.14 0");
        assert_eq!(toks[0], (TokenTag::Int, "42".into()));
        assert_eq!(toks[1], (TokenTag::Float, "3.14".into()));
        assert_eq!(toks[2], (TokenTag::Int, "0".into()));
    }

    #[test]
    fn test_keywords_and_idents() {
        let toks = lex_all("var foo while prototype");
        assert_eq!(toks[0].0, TokenTag::KwVar);
        assert_eq!(toks[1], (TokenTag::Ident, "foo".into()));
        assert_eq!(toks[2].0, TokenTag::KwWhile);
        assert_eq!(toks[3].0, TokenTag::KwPrototype);
    }

    #[test]
    fn test_longest_operator_wins() {
        let toks = lex_all("= == === != !==");
        let tags: Vec<TokenTag> = toks.iter().map(|t| t.0).collect();
        assert_eq!(
            tags,
            vec![
                TokenTag::Assign,
                TokenTag::EqEq,
                TokenTag::StrictEq,
                TokenTag::BangEq,
                TokenTag::StrictBangEq,
            ]
        );
    }

    #[test]
    fn test_string_spans_include_quotes() {
        let src = r#""hi\n" x"#;
        let toks = lex_all(src);
        assert_eq!(toks[0], (TokenTag::Str, "\"hi\\n\"".into()));
    }

    #[test]
    fn test_unterminated_string_is_unknown() {
        let toks = lex_all("\"oops\nvar x;");
        assert_eq!(toks[0].0, TokenTag::Unknown);
        // Lexing continues on the next line.
        assert_eq!(toks[1].0, TokenTag::KwVar);
    }

    #[test]
    fn test_unknown_byte() {
        let toks = lex_all("1 @ 2");
        assert_eq!(toks[1].0, TokenTag::Unknown);
    }

    #[test]
    fn test_comments_are_skipped() {
        let toks = lex_all("1 // line\n2 /* block */ 3");
        assert_eq!(toks.len(), 3);
    }

    #[test]
    fn test_eof_is_idempotent() {
        let mut table = LexTable::new();
        default_lexicals(&mut table);
        let mut lexer = Lexer::new("x", &table);
        lexer.next_token();
        assert_eq!(lexer.next_token().tag, TokenTag::Eof);
        assert_eq!(lexer.next_token().tag, TokenTag::Eof);
    }

    #[test]
    fn test_positions() {
        let mut table = LexTable::new();
        default_lexicals(&mut table);
        let src = "var x;\n  y = 1;";
        let mut lexer = Lexer::new(src, &table);
        let var_tok = lexer.next_token();
        assert_eq!((var_tok.line, var_tok.col), (1, 1));
        lexer.next_token(); // x
        lexer.next_token(); // ;
        let y_tok = lexer.next_token();
        assert_eq!((y_tok.line, y_tok.col), (2, 3));
    }
}
