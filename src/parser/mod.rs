//! Front end: lexer and recursive-descent parser.
//!
//! The parser produces the unannotated tree the analyser consumes. It keeps
//! three parse-time tables seeded by a token prescan - declared indicants,
//! declared operators, and operator priorities - because a bold word on its
//! own does not reveal whether it is a mode or an operator.

mod grammar;
mod lexer;

pub use grammar::{
    Parse, QUALIFIER_HEAP, QUALIFIER_LOC, RELATION_IS, RELATION_ISNT, TRIMMER_HAS_LWB,
    TRIMMER_HAS_UPB, parse_program,
};
pub use lexer::{LineIndex, Token, TokenKind, tokenize};
