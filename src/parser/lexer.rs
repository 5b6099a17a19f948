//! Logos-based lexer for UPPER-stropped Algol 68 source.
//!
//! Bold words (`BEGIN`, `INT`, user indicants) are single uppercase tokens;
//! identifiers are lowercase. Comments between `#` marks are skipped as
//! trivia. Positions are byte offsets converted to line/column spans.

use logos::Logos;
use text_size::TextSize;

use crate::base::{Position, Span};

/// A token with its kind, text and source span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub offset: TextSize,
    pub span: Span,
}

/// Logos token enum for the stropped source text.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^#]*#")]
pub enum TokenKind {
    // =========================================================================
    // WORDS
    // =========================================================================
    /// Bold word: keyword, standard or user indicant, or bold operator.
    #[regex(r"[A-Z][A-Z0-9]*")]
    BoldWord,

    /// Identifier (lowercase, digits and underscores).
    #[regex(r"[a-z][a-z0-9_]*")]
    Identifier,

    // =========================================================================
    // DENOTATIONS
    // =========================================================================
    /// Radix bits denotation such as `2r1010` or `16rff`.
    #[regex(r"[0-9]+r[0-9a-f]+")]
    BitsDenotation,

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    RealDenotation,

    #[regex(r"[0-9]+")]
    IntDenotation,

    /// Quote-delimited string; a doubled quote is one quote character.
    #[regex(r#""([^"]|"")*""#)]
    StringDenotation,

    // =========================================================================
    // COMPOUND SYMBOLS (longest match wins)
    // =========================================================================
    #[token("+:=")]
    PlusBecomes,
    #[token("-:=")]
    MinusBecomes,
    #[token("*:=")]
    TimesBecomes,
    #[token("/:=")]
    DivBecomes,
    #[token("%*:=")]
    ModBecomes,
    #[token("%:=")]
    OverBecomes,
    #[token("+=:")]
    PlusTo,
    #[token(":=:")]
    IsSymbol,
    #[token(":/=:")]
    IsntSymbol,
    #[token(":=")]
    Becomes,
    #[token("**")]
    Power,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("/=")]
    NotEqual,
    #[token("%*")]
    ModSymbol,

    // =========================================================================
    // SIMPLE SYMBOLS
    // =========================================================================
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Times,
    #[token("/")]
    Divide,
    #[token("%")]
    OverSymbol,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("=")]
    Equal,
    #[token("&")]
    Ampersand,
    #[token("^")]
    Caret,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,
    #[token("|:")]
    BriefOuse,
    #[token("|")]
    Bar,
    #[token("@")]
    At,
}

impl TokenKind {
    /// Symbols that denote dyadic or monadic operators.
    pub fn is_operator_symbol(self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Times
                | TokenKind::Divide
                | TokenKind::OverSymbol
                | TokenKind::ModSymbol
                | TokenKind::Power
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual
                | TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::Ampersand
                | TokenKind::Caret
                | TokenKind::PlusBecomes
                | TokenKind::MinusBecomes
                | TokenKind::TimesBecomes
                | TokenKind::DivBecomes
                | TokenKind::OverBecomes
                | TokenKind::ModBecomes
                | TokenKind::PlusTo
        )
    }
}

/// Byte-offset to line/column conversion for one source text.
#[derive(Debug)]
pub struct LineIndex {
    /// Byte offset of the start of each line.
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self { line_starts }
    }

    /// 1-indexed position of a byte offset.
    pub fn position(&self, offset: TextSize) -> Position {
        let offset: u32 = offset.into();
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        Position::new(line as u32 + 1, offset - self.line_starts[line] + 1)
    }

    pub fn span(&self, start: TextSize, end: TextSize) -> Span {
        Span::new(self.position(start), self.position(end))
    }
}

/// Tokenize an entire source text.
///
/// Unlexable characters surface as zero-length gaps the parser reports; the
/// token stream itself only carries valid tokens plus their spans.
pub fn tokenize(input: &str) -> (Vec<Token<'_>>, Vec<Span>) {
    let index = LineIndex::new(input);
    let mut lexer = TokenKind::lexer(input);
    let mut tokens = Vec::new();
    let mut bad_spans = Vec::new();
    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let start = TextSize::new(range.start as u32);
        let end = TextSize::new(range.end as u32);
        let span = index.span(start, end);
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                text: lexer.slice(),
                offset: start,
                span,
            }),
            Err(()) => bad_spans.push(span),
        }
    }
    (tokens, bad_spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn bold_words_and_identifiers() {
        assert_eq!(
            kinds("INT n = 10"),
            vec![
                TokenKind::BoldWord,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::IntDenotation,
            ]
        );
    }

    #[test]
    fn compound_symbols_take_longest_match() {
        assert_eq!(kinds("+:="), vec![TokenKind::PlusBecomes]);
        assert_eq!(kinds(":=:"), vec![TokenKind::IsSymbol]);
        assert_eq!(kinds(":="), vec![TokenKind::Becomes]);
        assert_eq!(kinds("%*:="), vec![TokenKind::ModBecomes]);
    }

    #[test]
    fn real_and_bits_denotations() {
        assert_eq!(kinds("3.14"), vec![TokenKind::RealDenotation]);
        assert_eq!(kinds("1e-10"), vec![TokenKind::RealDenotation]);
        assert_eq!(kinds("2r1010"), vec![TokenKind::BitsDenotation]);
        assert_eq!(kinds("42"), vec![TokenKind::IntDenotation]);
    }

    #[test]
    fn strings_with_doubled_quotes() {
        let (tokens, _) = tokenize(r#""he said ""hi""""#);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::StringDenotation);
    }

    #[test]
    fn hash_comments_are_trivia() {
        assert_eq!(
            kinds("1 # comment # + 2"),
            vec![
                TokenKind::IntDenotation,
                TokenKind::Plus,
                TokenKind::IntDenotation,
            ]
        );
    }

    #[test]
    fn positions_are_one_indexed() {
        let (tokens, _) = tokenize("a\n  b");
        assert_eq!(tokens[0].span.start, Position::new(1, 1));
        assert_eq!(tokens[1].span.start, Position::new(2, 3));
    }
}
