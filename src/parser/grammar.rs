//! Recursive-descent parser producing the unannotated tree.
//!
//! Declarations, units, formulas with dyadic priorities, enclosed clauses
//! and loop clauses for the stropped source. Error recovery is per serial
//! item: a syntax error reports a diagnostic and skips to the next
//! separator, so one bad unit surfaces without hiding the rest.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::base::{Diagnostic, Diagnostics, Interner, Name, Span};
use crate::tree::{Attribute, NodeId, Tree};

use super::lexer::{Token, TokenKind, tokenize};

/// Generator and variable-declaration qualifiers carried in `info`.
pub const QUALIFIER_LOC: i64 = 0;
pub const QUALIFIER_HEAP: i64 = 1;
/// Identity-relation polarity carried in `info`.
pub const RELATION_IS: i64 = 0;
pub const RELATION_ISNT: i64 = 1;
/// Trimmer `info` bits.
pub const TRIMMER_HAS_LWB: i64 = 1;
pub const TRIMMER_HAS_UPB: i64 = 2;

/// Parse result: the tree plus any syntax diagnostics.
#[derive(Debug)]
pub struct Parse {
    pub tree: Tree,
    pub interner: Interner,
    pub diagnostics: Diagnostics,
}

impl Parse {
    pub fn ok(&self) -> bool {
        !self.diagnostics.has_errors()
    }
}

/// Parse a particular program.
pub fn parse_program(source: &str) -> Parse {
    let (tokens, bad_spans) = tokenize(source);
    let mut parser = Parser::new(tokens);
    for span in bad_spans {
        parser
            .diagnostics
            .push(Diagnostic::syntax_error(span, "unrecognised character"));
    }
    parser.prescan();
    let root = parser.parse_particular_program();
    parser.tree.set_root(root);
    Parse {
        tree: parser.tree,
        interner: parser.interner,
        diagnostics: parser.diagnostics,
    }
}

const STANDARD_INDICANTS: &[&str] = &[
    "INT", "REAL", "BOOL", "CHAR", "BITS", "BYTES", "STRING", "COMPL", "SEMA", "VOID",
];

/// Bold words with a fixed syntactic role; never indicants or operators.
const KEYWORDS: &[&str] = &[
    "BEGIN", "END", "IF", "THEN", "ELIF", "ELSE", "FI", "CASE", "IN", "OUSE", "OUT", "ESAC",
    "FOR", "FROM", "BY", "TO", "WHILE", "DO", "OD", "UNTIL", "PROC", "OP", "PRIO", "MODE", "REF",
    "FLEX", "STRUCT", "UNION", "OF", "AT", "LOC", "HEAP", "NIL", "SKIP", "TRUE", "FALSE", "GOTO",
    "GO", "EXIT", "PAR", "LONG", "SHORT", "IS", "ISNT", "EMPTY",
];

/// Bold operators of the standard prelude.
const BOLD_OPERATORS: &[&str] = &[
    "ABS", "ARG", "BIN", "ENTIER", "LENG", "LEVEL", "ODD", "REPR", "ROUND", "SHORTEN", "SIGN",
    "NOT", "UPB", "LWB", "UP", "DOWN", "RE", "IM", "CONJ", "AND", "OR", "MOD", "OVER", "ELEM",
];

/// Standard dyadic priorities; PRIO declarations override per program.
fn default_priority(name: &str) -> Option<u8> {
    match name {
        "+:=" | "-:=" | "*:=" | "/:=" | "OVER:=" | "MOD:=" | "+=:" => Some(1),
        "OR" => Some(2),
        "AND" => Some(3),
        "=" | "/=" => Some(4),
        "<" | "<=" | ">" | ">=" => Some(5),
        "+" | "-" => Some(6),
        "*" | "/" | "OVER" | "MOD" | "ELEM" => Some(7),
        "**" | "UP" | "DOWN" | "LWB" | "UPB" => Some(8),
        _ => None,
    }
}

/// Canonical operator name of a symbol token.
fn symbol_operator(kind: TokenKind) -> Option<&'static str> {
    match kind {
        TokenKind::Plus => Some("+"),
        TokenKind::Minus => Some("-"),
        TokenKind::Times => Some("*"),
        TokenKind::Divide => Some("/"),
        TokenKind::OverSymbol => Some("OVER"),
        TokenKind::ModSymbol => Some("MOD"),
        TokenKind::Power => Some("**"),
        TokenKind::Less => Some("<"),
        TokenKind::LessEqual => Some("<="),
        TokenKind::Greater => Some(">"),
        TokenKind::GreaterEqual => Some(">="),
        TokenKind::Equal => Some("="),
        TokenKind::NotEqual => Some("/="),
        TokenKind::Ampersand => Some("AND"),
        TokenKind::PlusBecomes => Some("+:="),
        TokenKind::MinusBecomes => Some("-:="),
        TokenKind::TimesBecomes => Some("*:="),
        TokenKind::DivBecomes => Some("/:="),
        TokenKind::OverBecomes => Some("OVER:="),
        TokenKind::ModBecomes => Some("MOD:="),
        TokenKind::PlusTo => Some("+=:"),
        _ => None,
    }
}

/// What a serial clause stops at.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Stop {
    Sym(TokenKind),
    Bold(&'static str),
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    tree: Tree,
    interner: Interner,
    diagnostics: Diagnostics,
    /// Suppress diagnostics while speculating.
    speculating: u32,
    indicants: FxHashSet<Name>,
    operators: FxHashSet<Name>,
    priorities: FxHashMap<Name, u8>,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token<'a>>) -> Self {
        let mut interner = Interner::new();
        let mut indicants = FxHashSet::default();
        for name in STANDARD_INDICANTS {
            indicants.insert(interner.intern(name));
        }
        let mut operators = FxHashSet::default();
        for name in BOLD_OPERATORS {
            operators.insert(interner.intern(name));
        }
        Self {
            tokens,
            pos: 0,
            tree: Tree::new(),
            interner,
            diagnostics: Diagnostics::new(),
            speculating: 0,
            indicants,
            operators,
            priorities: FxHashMap::default(),
        }
    }

    // ========================================================================
    // TOKEN PLUMBING
    // ========================================================================

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_at(&self, n: usize) -> Option<&Token<'a>> {
        self.tokens.get(self.pos + n)
    }

    fn span(&self) -> Span {
        self.peek()
            .map(|t| t.span)
            .or_else(|| self.tokens.last().map(|t| t.span))
            .unwrap_or_default()
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn at_bold(&self, word: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::BoldWord && t.text == word)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_bold(&mut self, word: &str) -> bool {
        if self.at_bold(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) {
        if !self.eat(kind) {
            self.error(format!("expected {what}"));
        }
    }

    fn expect_bold(&mut self, word: &str) {
        if !self.eat_bold(word) {
            self.error(format!("expected {word}"));
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        if self.speculating == 0 {
            self.diagnostics
                .push(Diagnostic::syntax_error(self.span(), message.into()));
        }
    }

    fn intern(&mut self, text: &str) -> Name {
        self.interner.intern(text)
    }

    /// Consume one or more adjacent identifier words as a single tag,
    /// concatenated the way multi-word prelude tags are keyed.
    fn identifier_name(&mut self) -> Name {
        let mut text = String::new();
        while matches!(self.peek_kind(), Some(TokenKind::Identifier)) {
            let token = self.bump().expect("identifier word");
            text.push_str(token.text);
            // A word followed by OF or ':' starts a different construct.
            if matches!(self.peek_at(0), Some(t) if t.kind == TokenKind::BoldWord && t.text == "OF")
            {
                break;
            }
            if matches!(self.peek_kind(), Some(TokenKind::Colon)) {
                break;
            }
        }
        self.intern(&text)
    }

    // ========================================================================
    // PRESCAN
    // ========================================================================

    /// Seed the indicant/operator/priority tables so bold words classify
    /// during the real parse.
    fn prescan(&mut self) {
        for name in self.operators.iter() {
            if let Some(priority) = default_priority(name) {
                self.priorities.insert(name.clone(), priority);
            }
        }
        for kind in [
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Times,
            TokenKind::Divide,
            TokenKind::OverSymbol,
            TokenKind::ModSymbol,
            TokenKind::Power,
            TokenKind::Less,
            TokenKind::LessEqual,
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::Equal,
            TokenKind::NotEqual,
            TokenKind::PlusBecomes,
            TokenKind::MinusBecomes,
            TokenKind::TimesBecomes,
            TokenKind::DivBecomes,
            TokenKind::OverBecomes,
            TokenKind::ModBecomes,
            TokenKind::PlusTo,
        ] {
            let name = symbol_operator(kind).expect("operator symbol");
            let name = self.interner.intern(name);
            if let Some(priority) = default_priority(&name) {
                self.priorities.insert(name, priority);
            }
        }

        let mut i = 0;
        while i < self.tokens.len() {
            let token = &self.tokens[i];
            if token.kind != TokenKind::BoldWord {
                i += 1;
                continue;
            }
            match token.text {
                "MODE" => {
                    // MODE A = ..., B = ...; every bold followed by `=` up to
                    // the closing semicolon declares an indicant.
                    let mut j = i + 1;
                    let mut depth = 0usize;
                    while j + 1 < self.tokens.len() {
                        let t = &self.tokens[j];
                        match t.kind {
                            TokenKind::OpenParen | TokenKind::OpenBracket => depth += 1,
                            TokenKind::CloseParen | TokenKind::CloseBracket => {
                                if depth == 0 {
                                    break;
                                }
                                depth -= 1;
                            }
                            TokenKind::Semicolon if depth == 0 => break,
                            TokenKind::BoldWord
                                if depth == 0
                                    && self.tokens[j + 1].kind == TokenKind::Equal
                                    && !KEYWORDS.contains(&t.text) =>
                            {
                                let name = self.interner.intern(t.text);
                                self.indicants.insert(name);
                            }
                            _ => {}
                        }
                        j += 1;
                    }
                }
                "OP" => {
                    if let Some(next) = self.tokens.get(i + 1) {
                        let name = match next.kind {
                            TokenKind::BoldWord if !KEYWORDS.contains(&next.text) => {
                                Some(self.interner.intern(next.text))
                            }
                            kind => symbol_operator(kind).map(|n| self.interner.intern(n)),
                        };
                        if let Some(name) = name {
                            self.operators.insert(name);
                        }
                    }
                }
                "PRIO" => {
                    if let (Some(name_tok), Some(eq), Some(value)) = (
                        self.tokens.get(i + 1).cloned(),
                        self.tokens.get(i + 2),
                        self.tokens.get(i + 3),
                    ) {
                        let name = match name_tok.kind {
                            TokenKind::BoldWord => Some(self.interner.intern(name_tok.text)),
                            kind => symbol_operator(kind).map(|n| self.interner.intern(n)),
                        };
                        if eq.kind == TokenKind::Equal
                            && value.kind == TokenKind::IntDenotation
                        {
                            if let (Some(name), Ok(priority)) = (name, value.text.parse::<u8>()) {
                                self.operators.insert(name.clone());
                                self.priorities.insert(name, priority.min(9));
                            }
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    // ========================================================================
    // CLASSIFICATION
    // ========================================================================

    fn is_indicant(&self, text: &str) -> bool {
        self.indicants.contains(text)
    }

    /// Does the current token open a declarer?
    fn at_declarer(&self) -> bool {
        match self.peek() {
            Some(t) if t.kind == TokenKind::OpenBracket => true,
            Some(t) if t.kind == TokenKind::BoldWord => matches!(
                t.text,
                "REF" | "FLEX" | "STRUCT" | "UNION" | "PROC" | "LONG" | "SHORT"
            ) || self.is_indicant(t.text),
            _ => false,
        }
    }

    fn at_qualifier(&self) -> bool {
        self.at_bold("LOC") || self.at_bold("HEAP")
    }

    /// The dyadic operator at the cursor, with its priority.
    fn peek_dyadic(&self) -> Option<(Name, u8)> {
        let token = self.peek()?;
        let name: Name = match token.kind {
            TokenKind::BoldWord if self.operators.contains(token.text) => {
                self.interner.get(token.text)?
            }
            kind => {
                let symbol = symbol_operator(kind)?;
                self.interner.get(symbol)?
            }
        };
        let priority = self
            .priorities
            .get(&name)
            .copied()
            .or_else(|| default_priority(&name))?;
        Some((name, priority))
    }

    /// The monadic operator at the cursor, if the token can open an operand.
    fn peek_monadic(&self) -> Option<Name> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Minus => self.interner.get("-"),
            TokenKind::Plus => self.interner.get("+"),
            TokenKind::BoldWord
                if self.operators.contains(token.text)
                    // AND/OR and friends are dyadic only.
                    && !matches!(token.text, "AND" | "OR" | "MOD" | "OVER" | "ELEM") =>
            {
                self.interner.get(token.text)
            }
            _ => None,
        }
    }

    // ========================================================================
    // PROGRAM & SERIAL CLAUSES
    // ========================================================================

    fn parse_particular_program(&mut self) -> NodeId {
        let span = self.span();
        let program = self.tree.alloc(Attribute::PARTICULAR_PROGRAM, span);
        let serial = self.parse_serial(&[]);
        self.tree.attach(program, serial);
        if self.peek().is_some() {
            self.error("text after the particular program");
        }
        program
    }

    fn at_stop(&self, stops: &[Stop]) -> bool {
        match self.peek() {
            None => true,
            Some(token) => stops.iter().any(|stop| match stop {
                Stop::Sym(kind) => token.kind == *kind,
                Stop::Bold(word) => token.kind == TokenKind::BoldWord && token.text == *word,
            }),
        }
    }

    fn parse_serial(&mut self, stops: &[Stop]) -> NodeId {
        let span = self.span();
        let serial = self.tree.alloc(Attribute::SERIAL_CLAUSE, span);
        loop {
            if self.at_stop(stops) {
                break;
            }
            let before = self.pos;
            self.parse_serial_item(serial);
            if self.eat(TokenKind::Semicolon) {
                continue;
            }
            if self.at_bold("EXIT") {
                self.bump();
                if let Some(last) = self.tree.children(serial).last() {
                    self.tree.wrap(last, Attribute::COMPLETER);
                }
                continue;
            }
            if self.at_stop(stops) {
                break;
            }
            self.error("expected ';'");
            if self.pos == before {
                // Make progress so a stray token cannot wedge the parser.
                self.bump();
            }
        }
        serial
    }

    /// One serial item: labels, a declaration, or a unit.
    fn parse_serial_item(&mut self, serial: NodeId) {
        // label: unit
        while matches!(self.peek_kind(), Some(TokenKind::Identifier))
            && matches!(self.peek_at(1).map(|t| t.kind), Some(TokenKind::Colon))
        {
            let token = self.bump().expect("label token");
            let name = self.intern(token.text);
            let label = self
                .tree
                .alloc_symbol(Attribute::LABEL, token.span, name);
            self.tree.attach(serial, label);
            self.expect(TokenKind::Colon, "':'");
        }
        if self.at_bold("MODE") {
            self.parse_mode_declaration(serial);
        } else if self.at_bold("PRIO") {
            self.parse_priority_declaration(serial);
        } else if self.at_bold("OP") {
            self.parse_operator_declaration(serial);
        } else if self.at_bold("PROC")
            && matches!(self.peek_at(1).map(|t| t.kind), Some(TokenKind::Identifier))
            && matches!(self.peek_at(2).map(|t| t.kind), Some(TokenKind::Equal))
        {
            self.parse_procedure_declaration(serial);
        } else if self.at_declarer() || self.at_qualifier() {
            if !self.try_parse_declaration(serial) {
                let unit = self.parse_unit();
                self.tree.attach(serial, unit);
            }
        } else {
            let unit = self.parse_unit();
            self.tree.attach(serial, unit);
        }
    }

    // ========================================================================
    // DECLARATIONS
    // ========================================================================

    /// `MODE A = declarer, B = declarer`
    fn parse_mode_declaration(&mut self, serial: NodeId) {
        let span = self.span();
        self.expect_bold("MODE");
        let node = self.tree.alloc(Attribute::MODE_DECLARATION, span);
        self.tree.attach(serial, node);
        loop {
            let span = self.span();
            let name = match self.bump() {
                Some(t) if t.kind == TokenKind::BoldWord => self.intern(t.text),
                _ => {
                    self.error("expected a mode indicant");
                    break;
                }
            };
            self.expect(TokenKind::Equal, "'='");
            let defining = self
                .tree
                .alloc_symbol(Attribute::DEFINING_INDICANT, span, name);
            let declarer = self.parse_declarer();
            self.tree.attach(defining, declarer);
            self.tree.attach(node, defining);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
    }

    /// `PRIO op = 1, ...`
    fn parse_priority_declaration(&mut self, serial: NodeId) {
        let span = self.span();
        self.expect_bold("PRIO");
        let node = self.tree.alloc(Attribute::PRIORITY_DECLARATION, span);
        self.tree.attach(serial, node);
        loop {
            let span = self.span();
            let name = match self.bump() {
                Some(t) if t.kind == TokenKind::BoldWord => Some(self.intern(t.text)),
                Some(t) => symbol_operator(t.kind).map(|n| self.intern(n)),
                None => None,
            };
            let Some(name) = name else {
                self.error("expected an operator");
                break;
            };
            self.expect(TokenKind::Equal, "'='");
            let priority = match self.bump() {
                Some(t) if t.kind == TokenKind::IntDenotation => {
                    t.text.parse::<i64>().unwrap_or(0)
                }
                _ => {
                    self.error("expected a priority digit");
                    0
                }
            };
            if !(1..=9).contains(&priority) {
                self.error("priority must lie between 1 and 9");
            }
            let defining = self
                .tree
                .alloc_symbol(Attribute::DEFINING_OPERATOR, span, name);
            self.tree.node_mut(defining).info = priority;
            self.tree.attach(node, defining);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
    }

    /// `OP sym = routine text, ...`
    fn parse_operator_declaration(&mut self, serial: NodeId) {
        let span = self.span();
        self.expect_bold("OP");
        let node = self.tree.alloc(Attribute::OPERATOR_DECLARATION, span);
        self.tree.attach(serial, node);
        loop {
            let span = self.span();
            let name = match self.bump() {
                Some(t) if t.kind == TokenKind::BoldWord => Some(self.intern(t.text)),
                Some(t) => symbol_operator(t.kind).map(|n| self.intern(n)),
                None => None,
            };
            let Some(name) = name else {
                self.error("expected an operator symbol");
                break;
            };
            self.expect(TokenKind::Equal, "'='");
            let defining = self
                .tree
                .alloc_symbol(Attribute::DEFINING_OPERATOR, span, name);
            let routine = self.parse_routine_text();
            self.tree.attach(defining, routine);
            self.tree.attach(node, defining);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
    }

    /// `PROC f = routine text, ...`
    fn parse_procedure_declaration(&mut self, serial: NodeId) {
        let span = self.span();
        self.expect_bold("PROC");
        let node = self.tree.alloc(Attribute::IDENTITY_DECLARATION, span);
        self.tree.attach(serial, node);
        loop {
            let span = self.span();
            let name = match self.bump() {
                Some(t) if t.kind == TokenKind::Identifier => self.intern(t.text),
                _ => {
                    self.error("expected a procedure identifier");
                    break;
                }
            };
            self.expect(TokenKind::Equal, "'='");
            let defining = self
                .tree
                .alloc_symbol(Attribute::DEFINING_IDENTIFIER, span, name);
            let routine = self.parse_routine_text();
            self.tree.attach(defining, routine);
            self.tree.attach(node, defining);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
    }

    /// Identity or variable declaration opened by a declarer. Returns false
    /// (with the cursor restored) when no identifier follows and the
    /// declarer was really a cast or generator unit.
    fn try_parse_declaration(&mut self, serial: NodeId) -> bool {
        let start = self.pos;
        self.speculating += 1;
        let qualifier = if self.eat_bold("HEAP") {
            QUALIFIER_HEAP
        } else {
            self.eat_bold("LOC");
            QUALIFIER_LOC
        };
        let declarer = self.parse_declarer();
        let is_declaration = self.at(TokenKind::Identifier);
        self.speculating -= 1;
        if !is_declaration {
            self.pos = start;
            return false;
        }
        self.parse_declaration_defs(serial, qualifier, declarer);
        true
    }

    fn parse_declaration_defs(&mut self, serial: NodeId, qualifier: i64, declarer: NodeId) {
        let span = self.tree.node(declarer).span;
        let name_token = self.bump().expect("declared identifier");
        let name = self.intern(name_token.text);
        let defining =
            self.tree
                .alloc_symbol(Attribute::DEFINING_IDENTIFIER, name_token.span, name);

        let node = if self.eat(TokenKind::Equal) {
            let node = self.tree.alloc(Attribute::IDENTITY_DECLARATION, span);
            self.tree.attach(node, declarer);
            let source = self.parse_unit();
            self.tree.attach(defining, source);
            self.tree.attach(node, defining);
            node
        } else {
            let node = self.tree.alloc(Attribute::VARIABLE_DECLARATION, span);
            self.tree.node_mut(node).info = qualifier;
            self.tree.attach(node, declarer);
            if self.eat(TokenKind::Becomes) {
                let initial = self.parse_unit();
                self.tree.attach(defining, initial);
            }
            self.tree.attach(node, defining);
            node
        };
        self.tree.attach(serial, node);
        let identity = self.tree.node(node).attr == Attribute::IDENTITY_DECLARATION;

        while self.eat(TokenKind::Comma) {
            if self.at_declarer() || self.at_qualifier() {
                // A fresh declarer starts a sibling declaration group.
                if !self.try_parse_declaration(serial) {
                    self.error("expected a declaration after ','");
                }
                return;
            }
            let span = self.span();
            let name = match self.bump() {
                Some(t) if t.kind == TokenKind::Identifier => self.intern(t.text),
                _ => {
                    self.error("expected an identifier");
                    return;
                }
            };
            let defining = self
                .tree
                .alloc_symbol(Attribute::DEFINING_IDENTIFIER, span, name);
            if identity {
                self.expect(TokenKind::Equal, "'='");
                let source = self.parse_unit();
                self.tree.attach(defining, source);
            } else if self.eat(TokenKind::Becomes) {
                let initial = self.parse_unit();
                self.tree.attach(defining, initial);
            }
            self.tree.attach(node, defining);
        }
    }

    // ========================================================================
    // DECLARERS
    // ========================================================================

    fn parse_declarer(&mut self) -> NodeId {
        let span = self.span();
        if self.eat_bold("REF") {
            let node = self.tree.alloc(Attribute::REF_DECLARER, span);
            let inner = self.parse_declarer();
            self.tree.attach(node, inner);
            return node;
        }
        if self.eat_bold("FLEX") {
            let node = self.tree.alloc(Attribute::FLEX_DECLARER, span);
            let inner = self.parse_declarer();
            self.tree.attach(node, inner);
            return node;
        }
        if self.at(TokenKind::OpenBracket) {
            return self.parse_row_declarer();
        }
        if self.eat_bold("STRUCT") {
            return self.parse_struct_declarer(span);
        }
        if self.eat_bold("UNION") {
            return self.parse_union_declarer(span);
        }
        if self.eat_bold("PROC") {
            return self.parse_proc_declarer(span);
        }
        // LONG / SHORT sizety then an indicant.
        let mut sizety = 0i64;
        while self.at_bold("LONG") || self.at_bold("SHORT") {
            sizety += if self.at_bold("LONG") { 1 } else { -1 };
            self.bump();
        }
        let peeked = match self.peek() {
            Some(t) if t.kind == TokenKind::BoldWord && !KEYWORDS.contains(&t.text) => {
                Some((t.text, t.span))
            }
            _ => None,
        };
        match peeked {
            Some((text, span)) => {
                let name = self.intern(text);
                self.bump();
                let node = self
                    .tree
                    .alloc_symbol(Attribute::DECLARER_INDICANT, span, name);
                self.tree.node_mut(node).info = sizety;
                node
            }
            _ => {
                self.error("expected a declarer");
                self.tree.alloc(Attribute::ERROR, span)
            }
        }
    }

    /// `[ bounds ] declarer`; bounds may be empty in formal positions.
    fn parse_row_declarer(&mut self) -> NodeId {
        let span = self.span();
        self.expect(TokenKind::OpenBracket, "'['");
        let node = self.tree.alloc(Attribute::ROW_DECLARER, span);
        let bounds = self.tree.alloc(Attribute::BOUNDS, span);
        let mut dims = 1i64;
        loop {
            if self.at(TokenKind::CloseBracket) {
                break;
            }
            if self.at(TokenKind::Comma) {
                self.bump();
                dims += 1;
                continue;
            }
            let pair_span = self.span();
            let pair = self.tree.alloc(Attribute::BOUND_PAIR, pair_span);
            let first = self.parse_unit();
            if self.eat(TokenKind::Colon) {
                let upper = self.parse_unit();
                self.tree.node_mut(pair).info = 1;
                self.tree.attach(pair, first);
                self.tree.attach(pair, upper);
            } else {
                self.tree.attach(pair, first);
            }
            self.tree.attach(bounds, pair);
            if self.eat(TokenKind::Comma) {
                dims += 1;
                continue;
            }
            break;
        }
        self.expect(TokenKind::CloseBracket, "']'");
        self.tree.node_mut(node).info = dims;
        self.tree.attach(node, bounds);
        let elem = self.parse_declarer();
        self.tree.attach(node, elem);
        node
    }

    /// `STRUCT (declarer field, field, declarer field, ...)`
    fn parse_struct_declarer(&mut self, span: Span) -> NodeId {
        let node = self.tree.alloc(Attribute::STRUCT_DECLARER, span);
        self.expect(TokenKind::OpenParen, "'('");
        loop {
            let declarer = self.parse_declarer();
            let mut first = true;
            loop {
                let field_span = self.span();
                let name = match self.bump() {
                    Some(t) if t.kind == TokenKind::Identifier => self.intern(t.text),
                    _ => {
                        self.error("expected a field selector");
                        break;
                    }
                };
                let field = self
                    .tree
                    .alloc_symbol(Attribute::FIELD_DECLARER, field_span, name);
                let field_declarer = if first {
                    first = false;
                    declarer
                } else {
                    self.tree.clone_subtree(declarer)
                };
                self.tree.attach(field, field_declarer);
                self.tree.attach(node, field);
                // Another lowercase name continues this field group.
                if self.at(TokenKind::Comma)
                    && matches!(self.peek_at(1).map(|t| t.kind), Some(TokenKind::Identifier))
                {
                    self.bump();
                    continue;
                }
                break;
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseParen, "')'");
        node
    }

    /// `UNION (declarer, declarer, ...)`
    fn parse_union_declarer(&mut self, span: Span) -> NodeId {
        let node = self.tree.alloc(Attribute::UNION_DECLARER, span);
        self.expect(TokenKind::OpenParen, "'('");
        loop {
            let member = self.parse_declarer();
            self.tree.attach(node, member);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseParen, "')'");
        node
    }

    /// `PROC (declarer, ...) declarer` or `PROC declarer`
    fn parse_proc_declarer(&mut self, span: Span) -> NodeId {
        let node = self.tree.alloc(Attribute::PROC_DECLARER, span);
        let mut params = 0i64;
        if self.eat(TokenKind::OpenParen) {
            loop {
                let param = self.parse_declarer();
                self.tree.attach(node, param);
                params += 1;
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::CloseParen, "')'");
        }
        self.tree.node_mut(node).info = params;
        let result = self.parse_declarer();
        self.tree.attach(node, result);
        node
    }

    // ========================================================================
    // ROUTINE TEXTS
    // ========================================================================

    /// `(declarer a, declarer b) declarer : unit` or `declarer : unit`
    fn parse_routine_text(&mut self) -> NodeId {
        let span = self.span();
        let node = self.tree.alloc(Attribute::ROUTINE_TEXT, span);
        let mut params = 0i64;
        if self.eat(TokenKind::OpenParen) {
            loop {
                let declarer = self.parse_declarer();
                let mut first = true;
                loop {
                    let p_span = self.span();
                    let name = match self.bump() {
                        Some(t) if t.kind == TokenKind::Identifier => self.intern(t.text),
                        _ => {
                            self.error("expected a parameter identifier");
                            break;
                        }
                    };
                    let parameter =
                        self.tree.alloc_symbol(Attribute::PARAMETER, p_span, name);
                    let param_declarer = if first {
                        first = false;
                        declarer
                    } else {
                        self.tree.clone_subtree(declarer)
                    };
                    self.tree.attach(parameter, param_declarer);
                    self.tree.attach(node, parameter);
                    params += 1;
                    if self.at(TokenKind::Comma)
                        && matches!(self.peek_at(1).map(|t| t.kind), Some(TokenKind::Identifier))
                    {
                        self.bump();
                        continue;
                    }
                    break;
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::CloseParen, "')'");
        }
        self.tree.node_mut(node).info = params;
        let result = self.parse_declarer();
        self.tree.attach(node, result);
        self.expect(TokenKind::Colon, "':'");
        let body = self.parse_unit();
        self.tree.attach(node, body);
        node
    }

    // ========================================================================
    // UNITS
    // ========================================================================

    fn parse_unit(&mut self) -> NodeId {
        let span = self.span();
        let tertiary = self.parse_formula(1);
        if self.eat(TokenKind::Becomes) {
            let node = self.tree.alloc(Attribute::ASSIGNATION, span);
            let source = self.parse_unit();
            self.tree.attach(node, tertiary);
            self.tree.attach(node, source);
            return node;
        }
        let polarity = if self.at(TokenKind::IsSymbol) || self.at_bold("IS") {
            Some(RELATION_IS)
        } else if self.at(TokenKind::IsntSymbol) || self.at_bold("ISNT") {
            Some(RELATION_ISNT)
        } else {
            None
        };
        if let Some(polarity) = polarity {
            self.bump();
            let node = self.tree.alloc(Attribute::IDENTITY_RELATION, span);
            self.tree.node_mut(node).info = polarity;
            let rhs = self.parse_formula(1);
            self.tree.attach(node, tertiary);
            self.tree.attach(node, rhs);
            return node;
        }
        tertiary
    }

    /// Precedence-climbing formula parse; dyadic operators are left
    /// associative within one priority.
    fn parse_formula(&mut self, min_priority: u8) -> NodeId {
        let mut lhs = self.parse_monadic_operand();
        while let Some((name, priority)) = self.peek_dyadic() {
            if priority < min_priority {
                break;
            }
            let op_token = self.bump().expect("dyadic operator");
            let operator = self
                .tree
                .alloc_symbol(Attribute::OPERATOR, op_token.span, name);
            let rhs = self.parse_formula(priority + 1);
            let span = self.tree.node(lhs).span.merge(self.tree.node(rhs).span);
            let formula = self.tree.alloc(Attribute::FORMULA, span);
            self.tree.attach(formula, lhs);
            self.tree.attach(formula, operator);
            self.tree.attach(formula, rhs);
            lhs = formula;
        }
        lhs
    }

    fn parse_monadic_operand(&mut self) -> NodeId {
        if let Some(name) = self.peek_monadic() {
            let op_token = self.bump().expect("monadic operator");
            let operator = self
                .tree
                .alloc_symbol(Attribute::OPERATOR, op_token.span, name);
            let operand = self.parse_monadic_operand();
            let node = self.tree.alloc(Attribute::MONADIC_FORMULA, op_token.span);
            self.tree.attach(node, operator);
            self.tree.attach(node, operand);
            return node;
        }
        self.parse_secondary()
    }

    fn parse_secondary(&mut self) -> NodeId {
        let span = self.span();
        if self.at_bold("LOC") || self.at_bold("HEAP") {
            let qualifier = if self.at_bold("HEAP") {
                QUALIFIER_HEAP
            } else {
                QUALIFIER_LOC
            };
            self.bump();
            let node = self.tree.alloc(Attribute::GENERATOR, span);
            self.tree.node_mut(node).info = qualifier;
            let declarer = self.parse_declarer();
            self.tree.attach(node, declarer);
            return node;
        }
        // selector OF secondary
        if matches!(self.peek_kind(), Some(TokenKind::Identifier))
            && matches!(self.peek_at(1), Some(t) if t.kind == TokenKind::BoldWord && t.text == "OF")
        {
            let token = self.bump().expect("field selector");
            let name = self.intern(token.text);
            self.bump(); // OF
            let node = self
                .tree
                .alloc_symbol(Attribute::SELECTION, token.span, name);
            let secondary = self.parse_secondary();
            self.tree.attach(node, secondary);
            return node;
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> NodeId {
        let mut primary = self.parse_primary_atom();
        loop {
            if self.at(TokenKind::OpenParen) {
                primary = self.parse_call(primary);
            } else if self.at(TokenKind::OpenBracket) {
                primary = self.parse_slice(primary);
            } else {
                break;
            }
        }
        primary
    }

    fn parse_call(&mut self, callee: NodeId) -> NodeId {
        let span = self.span();
        self.expect(TokenKind::OpenParen, "'('");
        let node = self.tree.alloc(Attribute::CALL, span);
        self.tree.attach(node, callee);
        loop {
            let argument = self.parse_unit();
            self.tree.attach(node, argument);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseParen, "')'");
        node
    }

    fn parse_slice(&mut self, sliced: NodeId) -> NodeId {
        let span = self.span();
        self.expect(TokenKind::OpenBracket, "'['");
        let node = self.tree.alloc(Attribute::SLICE, span);
        self.tree.attach(node, sliced);
        loop {
            let item_span = self.span();
            if self.at(TokenKind::Colon) {
                // [: upb] or [:]
                self.bump();
                let trimmer = self.tree.alloc(Attribute::TRIMMER, item_span);
                if !self.at(TokenKind::Comma) && !self.at(TokenKind::CloseBracket) {
                    let upper = self.parse_unit();
                    self.tree.node_mut(trimmer).info = TRIMMER_HAS_UPB;
                    self.tree.attach(trimmer, upper);
                }
                self.tree.attach(node, trimmer);
            } else {
                let first = self.parse_unit();
                if self.eat(TokenKind::Colon) {
                    let trimmer = self.tree.alloc(Attribute::TRIMMER, item_span);
                    if self.at(TokenKind::Comma) || self.at(TokenKind::CloseBracket) {
                        self.tree.node_mut(trimmer).info = TRIMMER_HAS_LWB;
                        self.tree.attach(trimmer, first);
                    } else {
                        let upper = self.parse_unit();
                        self.tree.node_mut(trimmer).info = TRIMMER_HAS_LWB | TRIMMER_HAS_UPB;
                        self.tree.attach(trimmer, first);
                        self.tree.attach(trimmer, upper);
                    }
                    self.tree.attach(node, trimmer);
                } else {
                    let subscript = self.tree.alloc(Attribute::SUBSCRIPT, item_span);
                    self.tree.attach(subscript, first);
                    self.tree.attach(node, subscript);
                }
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseBracket, "']'");
        node
    }

    fn parse_primary_atom(&mut self) -> NodeId {
        let span = self.span();
        let Some(token) = self.peek().cloned() else {
            self.error("expected a unit");
            return self.tree.alloc(Attribute::ERROR, span);
        };
        match token.kind {
            TokenKind::IntDenotation => {
                self.bump();
                let name = self.intern(token.text);
                self.tree
                    .alloc_symbol(Attribute::INT_DENOTATION, token.span, name)
            }
            TokenKind::RealDenotation => {
                self.bump();
                let name = self.intern(token.text);
                self.tree
                    .alloc_symbol(Attribute::REAL_DENOTATION, token.span, name)
            }
            TokenKind::BitsDenotation => {
                self.bump();
                let name = self.intern(token.text);
                self.tree
                    .alloc_symbol(Attribute::BITS_DENOTATION, token.span, name)
            }
            TokenKind::StringDenotation => {
                self.bump();
                let text = token.text[1..token.text.len() - 1].replace("\"\"", "\"");
                let name = self.intern(&text);
                let attr = if text.chars().count() == 1 {
                    Attribute::CHAR_DENOTATION
                } else {
                    Attribute::STRING_DENOTATION
                };
                self.tree.alloc_symbol(attr, token.span, name)
            }
            TokenKind::Identifier => {
                // Adjacent lowercase words form one tag: `max int`.
                let name = self.identifier_name();
                self.tree
                    .alloc_symbol(Attribute::IDENTIFIER, token.span, name)
            }
            TokenKind::OpenParen => {
                self.bump();
                self.parse_enclosed(Stop::Sym(TokenKind::CloseParen))
            }
            TokenKind::BoldWord => self.parse_bold_primary(&token),
            _ => {
                self.error(format!("unexpected '{}'", token.text));
                self.bump();
                self.tree.alloc(Attribute::ERROR, span)
            }
        }
    }

    fn parse_bold_primary(&mut self, token: &Token<'a>) -> NodeId {
        let span = token.span;
        match token.text {
            "TRUE" | "FALSE" => {
                self.bump();
                let name = self.intern(token.text);
                self.tree
                    .alloc_symbol(Attribute::BOOL_DENOTATION, span, name)
            }
            "NIL" => {
                self.bump();
                self.tree.alloc(Attribute::NIHIL, span)
            }
            "SKIP" | "EMPTY" => {
                self.bump();
                self.tree.alloc(Attribute::SKIP, span)
            }
            "GOTO" | "GO" => {
                self.bump();
                if token.text == "GO" {
                    self.expect_bold("TO");
                }
                match self.bump() {
                    Some(t) if t.kind == TokenKind::Identifier => {
                        let name = self.intern(t.text);
                        self.tree.alloc_symbol(Attribute::JUMP, span, name)
                    }
                    _ => {
                        self.error("expected a label after GOTO");
                        self.tree.alloc(Attribute::ERROR, span)
                    }
                }
            }
            "IF" => {
                self.bump();
                let node = self.parse_conditional_tail();
                self.expect_bold("FI");
                node
            }
            "CASE" => {
                self.bump();
                let node = self.parse_case_tail();
                self.expect_bold("ESAC");
                node
            }
            "BEGIN" => {
                self.bump();
                self.parse_enclosed(Stop::Bold("END"))
            }
            "PAR" => {
                self.bump();
                self.parse_parallel()
            }
            "FOR" | "FROM" | "BY" | "TO" | "WHILE" | "DO" => self.parse_loop(),
            "LONG" | "SHORT" => {
                // A sizety prefix opens either a long denotation or a long
                // declarer (cast / routine text).
                let mut ahead = 0;
                while matches!(
                    self.peek_at(ahead),
                    Some(t) if t.kind == TokenKind::BoldWord
                        && (t.text == "LONG" || t.text == "SHORT")
                ) {
                    ahead += 1;
                }
                match self.peek_at(ahead).map(|t| t.kind) {
                    Some(
                        TokenKind::IntDenotation
                        | TokenKind::RealDenotation
                        | TokenKind::BitsDenotation,
                    ) => self.parse_long_denotation(),
                    _ => self.parse_cast_or_routine(),
                }
            }
            _ if self.at_declarer() => self.parse_cast_or_routine(),
            _ => {
                self.error(format!("unexpected {}", token.text));
                self.bump();
                self.tree.alloc(Attribute::ERROR, span)
            }
        }
    }

    fn parse_long_denotation(&mut self) -> NodeId {
        let span = self.span();
        let mut sizety = 0i64;
        while self.at_bold("LONG") || self.at_bold("SHORT") {
            sizety += if self.at_bold("LONG") { 1 } else { -1 };
            self.bump();
        }
        let token = self.bump().expect("long denotation");
        let attr = match token.kind {
            TokenKind::IntDenotation => Attribute::INT_DENOTATION,
            TokenKind::RealDenotation => Attribute::REAL_DENOTATION,
            _ => Attribute::BITS_DENOTATION,
        };
        let name = self.intern(token.text);
        let node = self.tree.alloc_symbol(attr, span, name);
        self.tree.node_mut(node).info = sizety;
        node
    }

    /// A declarer in unit position: `declarer : unit` is a routine text,
    /// `declarer (enclosed)` is a cast.
    fn parse_cast_or_routine(&mut self) -> NodeId {
        let start = self.pos;
        let span = self.span();
        // Routine texts with parameters start with '(' and are tried first
        // from parse_enclosed; here the declarer itself leads.
        self.speculating += 1;
        let declarer = self.parse_declarer();
        let next = self.peek_kind();
        self.speculating -= 1;
        match next {
            Some(TokenKind::Colon) => {
                self.pos = start;
                self.parse_routine_text()
            }
            Some(TokenKind::OpenParen) => {
                self.bump();
                let node = self.tree.alloc(Attribute::CAST, span);
                self.tree.attach(node, declarer);
                let enclosed = self.parse_enclosed(Stop::Sym(TokenKind::CloseParen));
                self.tree.attach(node, enclosed);
                node
            }
            _ => {
                self.error("expected ':' or '(' after a declarer in unit position");
                self.tree.alloc(Attribute::ERROR, span)
            }
        }
    }

    // ========================================================================
    // ENCLOSED CLAUSES
    // ========================================================================

    /// After `(` or `BEGIN`: closed clause, collateral display, routine
    /// text, or brief conditional / case.
    fn parse_enclosed(&mut self, close: Stop) -> NodeId {
        let span = self.span();
        // Empty display: () or BEGIN END.
        if self.at_stop(&[close]) {
            if self.peek().is_none() {
                self.error("unexpected end of source in an enclosed clause");
            } else {
                self.bump();
            }
            return self.tree.alloc(Attribute::COLLATERAL_CLAUSE, span);
        }
        // A parenthesised parameter pack makes a routine text; try it
        // speculatively when the shape fits.
        if close == Stop::Sym(TokenKind::CloseParen)
            && self.at_declarer()
            && self.routine_text_ahead()
        {
            self.pos -= 1; // rewind onto '('
            return self.parse_routine_text();
        }
        let serial = self.parse_serial(&[
            close,
            Stop::Sym(TokenKind::Comma),
            Stop::Sym(TokenKind::Bar),
            Stop::Sym(TokenKind::BriefOuse),
        ]);
        match self.peek_kind() {
            Some(TokenKind::Comma) => self.parse_collateral_tail(span, serial, close),
            Some(TokenKind::Bar) => {
                let node = self.parse_brief_tail(span, serial, close);
                match close {
                    Stop::Sym(kind) => self.expect(kind, "')'"),
                    Stop::Bold(word) => self.expect_bold(word),
                }
                node
            }
            _ => {
                match close {
                    Stop::Sym(kind) => self.expect(kind, "closing bracket"),
                    Stop::Bold(word) => self.expect_bold(word),
                }
                let node = self.tree.alloc(Attribute::CLOSED_CLAUSE, span);
                self.tree.attach(node, serial);
                node
            }
        }
    }

    /// Token lookahead for `( params ) declarer :`.
    fn routine_text_ahead(&mut self) -> bool {
        let start = self.pos;
        self.speculating += 1;
        let matched = (|p: &mut Self| {
            loop {
                let _ = p.parse_declarer();
                if !matches!(p.peek_kind(), Some(TokenKind::Identifier)) {
                    return false;
                }
                p.bump();
                if p.eat(TokenKind::Comma) {
                    continue;
                }
                break;
            }
            if !p.eat(TokenKind::CloseParen) {
                return false;
            }
            let _ = p.parse_declarer();
            matches!(p.peek_kind(), Some(TokenKind::Colon))
        })(self);
        self.speculating -= 1;
        self.pos = start;
        matched
    }

    fn parse_collateral_tail(&mut self, span: Span, first: NodeId, close: Stop) -> NodeId {
        let node = self.tree.alloc(Attribute::COLLATERAL_CLAUSE, span);
        let unit = self.demote_serial_to_unit(first);
        self.tree.attach(node, unit);
        while self.eat(TokenKind::Comma) {
            let unit = self.parse_unit();
            self.tree.attach(node, unit);
        }
        match close {
            Stop::Sym(kind) => self.expect(kind, "closing bracket"),
            Stop::Bold(word) => self.expect_bold(word),
        }
        node
    }

    /// Collateral elements are units; unwrap a single-item serial clause.
    fn demote_serial_to_unit(&mut self, serial: NodeId) -> NodeId {
        let children = self.tree.child_vec(serial);
        match children.as_slice() {
            [only] => {
                let unit = *only;
                self.tree.detach(unit);
                unit
            }
            _ => {
                self.error("a collateral element must be a single unit");
                serial
            }
        }
    }

    /// After `|`: brief conditional `(e | u)`, brief case `(e | u, u)`,
    /// with `|` else parts and `|:` nesting.
    fn parse_brief_tail(&mut self, span: Span, enquiry_serial: NodeId, close: Stop) -> NodeId {
        self.expect(TokenKind::Bar, "'|'");
        let enquiry = self.tree.alloc(Attribute::ENQUIRY_CLAUSE, span);
        self.tree.attach(enquiry, enquiry_serial);

        let mut arms: Vec<NodeId> = Vec::new();
        loop {
            let arm = self.parse_serial(&[
                close,
                Stop::Sym(TokenKind::Comma),
                Stop::Sym(TokenKind::Bar),
                Stop::Sym(TokenKind::BriefOuse),
            ]);
            arms.push(arm);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        if arms.len() > 1 {
            // Brief case clause.
            let node = self.tree.alloc(Attribute::CASE_CLAUSE, span);
            self.tree.attach(node, enquiry);
            for arm in arms {
                let part = self.tree.alloc(Attribute::CASE_PART, span);
                let unit = self.demote_serial_to_unit(arm);
                self.tree.attach(part, unit);
                self.tree.attach(node, part);
            }
            if self.eat(TokenKind::BriefOuse) {
                let nested_serial = self.parse_serial(&[
                    close,
                    Stop::Sym(TokenKind::Bar),
                    Stop::Sym(TokenKind::BriefOuse),
                    Stop::Sym(TokenKind::Comma),
                ]);
                let nested = self.parse_brief_tail(span, nested_serial, close);
                self.tree.attach(node, nested);
            } else if self.eat(TokenKind::Bar) {
                let out = self.parse_serial(&[close]);
                let part = self.tree.alloc(Attribute::OUT_PART, span);
                self.tree.attach(part, out);
                self.tree.attach(node, part);
            }
            node
        } else {
            // Brief conditional clause.
            let node = self.tree.alloc(Attribute::CONDITIONAL_CLAUSE, span);
            self.tree.attach(node, enquiry);
            let then_part = self.tree.alloc(Attribute::THEN_PART, span);
            self.tree.attach(then_part, arms[0]);
            self.tree.attach(node, then_part);
            if self.eat(TokenKind::BriefOuse) {
                let nested_serial = self.parse_serial(&[
                    close,
                    Stop::Sym(TokenKind::Bar),
                    Stop::Sym(TokenKind::BriefOuse),
                    Stop::Sym(TokenKind::Comma),
                ]);
                let nested = self.parse_brief_tail(span, nested_serial, close);
                self.tree.attach(node, nested);
            } else if self.eat(TokenKind::Bar) {
                let else_serial = self.parse_serial(&[close]);
                let else_part = self.tree.alloc(Attribute::ELSE_PART, span);
                self.tree.attach(else_part, else_serial);
                self.tree.attach(node, else_part);
            }
            node
        }
    }

    /// After `IF` or `ELIF`: enquiry THEN part, optional ELIF / ELSE.
    /// The caller owns the closing `FI`.
    fn parse_conditional_tail(&mut self) -> NodeId {
        let span = self.span();
        let node = self.tree.alloc(Attribute::CONDITIONAL_CLAUSE, span);
        let enquiry = self.tree.alloc(Attribute::ENQUIRY_CLAUSE, span);
        let enquiry_serial = self.parse_serial(&[Stop::Bold("THEN")]);
        self.tree.attach(enquiry, enquiry_serial);
        self.tree.attach(node, enquiry);
        self.expect_bold("THEN");
        let then_part = self.tree.alloc(Attribute::THEN_PART, span);
        let then_serial =
            self.parse_serial(&[Stop::Bold("ELIF"), Stop::Bold("ELSE"), Stop::Bold("FI")]);
        self.tree.attach(then_part, then_serial);
        self.tree.attach(node, then_part);
        if self.eat_bold("ELIF") {
            let nested = self.parse_conditional_tail();
            self.tree.attach(node, nested);
        } else if self.eat_bold("ELSE") {
            let else_part = self.tree.alloc(Attribute::ELSE_PART, span);
            let else_serial = self.parse_serial(&[Stop::Bold("FI")]);
            self.tree.attach(else_part, else_serial);
            self.tree.attach(node, else_part);
        }
        node
    }

    /// After `CASE` or `OUSE`: enquiry IN arms, optional OUSE / OUT.
    /// The caller owns the closing `ESAC`.
    fn parse_case_tail(&mut self) -> NodeId {
        let span = self.span();
        let enquiry = self.tree.alloc(Attribute::ENQUIRY_CLAUSE, span);
        let enquiry_serial = self.parse_serial(&[Stop::Bold("IN")]);
        self.tree.attach(enquiry, enquiry_serial);
        self.expect_bold("IN");

        let conformity = self.conformity_arm_ahead();
        let node = if conformity {
            self.tree.alloc(Attribute::CONFORMITY_CLAUSE, span)
        } else {
            self.tree.alloc(Attribute::CASE_CLAUSE, span)
        };
        self.tree.attach(node, enquiry);
        loop {
            if conformity {
                let arm = self.parse_specified_unit();
                self.tree.attach(node, arm);
            } else {
                let part = self.tree.alloc(Attribute::CASE_PART, span);
                let unit = self.parse_unit();
                self.tree.attach(part, unit);
                self.tree.attach(node, part);
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        if self.eat_bold("OUSE") {
            let nested = self.parse_case_tail();
            self.tree.attach(node, nested);
        } else if self.eat_bold("OUT") {
            let out_part = self.tree.alloc(Attribute::OUT_PART, span);
            let out_serial = self.parse_serial(&[Stop::Bold("ESAC")]);
            self.tree.attach(out_part, out_serial);
            self.tree.attach(node, out_part);
        }
        node
    }

    /// Token lookahead for a conformity arm `( declarer [id] ) :`.
    fn conformity_arm_ahead(&mut self) -> bool {
        let start = self.pos;
        self.speculating += 1;
        let matched = (|p: &mut Self| {
            if !p.eat(TokenKind::OpenParen) {
                return false;
            }
            if !p.at_declarer() {
                return false;
            }
            let _ = p.parse_declarer();
            if p.at(TokenKind::Identifier) {
                p.bump();
            }
            p.eat(TokenKind::CloseParen) && p.at(TokenKind::Colon)
        })(self);
        self.speculating -= 1;
        self.pos = start;
        matched
    }

    /// `( declarer [id] ) : unit`
    fn parse_specified_unit(&mut self) -> NodeId {
        let span = self.span();
        let node = self.tree.alloc(Attribute::SPECIFIED_UNIT, span);
        self.expect(TokenKind::OpenParen, "'('");
        let declarer = self.parse_declarer();
        self.tree.attach(node, declarer);
        if let Some(t) = self.peek().cloned() {
            if t.kind == TokenKind::Identifier {
                self.bump();
                let name = self.intern(t.text);
                self.tree.node_mut(node).symbol = Some(name);
            }
        }
        self.expect(TokenKind::CloseParen, "')'");
        self.expect(TokenKind::Colon, "':'");
        let unit = self.parse_unit();
        self.tree.attach(node, unit);
        node
    }

    /// `PAR BEGIN unit, unit END`
    fn parse_parallel(&mut self) -> NodeId {
        let span = self.span();
        let node = self.tree.alloc(Attribute::PARALLEL_CLAUSE, span);
        let open_paren = self.eat(TokenKind::OpenParen);
        if !open_paren {
            self.expect_bold("BEGIN");
        }
        loop {
            let unit = self.parse_unit();
            self.tree.attach(node, unit);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        if open_paren {
            self.expect(TokenKind::CloseParen, "')'");
        } else {
            self.expect_bold("END");
        }
        node
    }
}

/// Loop clauses hang off the keyword set rather than the primary grammar;
/// entered from the unit parser when a loop word leads.
impl<'a> Parser<'a> {
    fn parse_loop(&mut self) -> NodeId {
        let span = self.span();
        let node = self.tree.alloc(Attribute::LOOP_CLAUSE, span);
        if self.eat_bold("FOR") {
            let token = self.bump();
            match token {
                Some(t) if t.kind == TokenKind::Identifier => {
                    let name = self.intern(t.text);
                    let part = self.tree.alloc_symbol(Attribute::FOR_PART, t.span, name);
                    self.tree.attach(node, part);
                }
                _ => self.error("expected an iteration identifier after FOR"),
            }
        }
        if self.eat_bold("FROM") {
            let part = self.tree.alloc(Attribute::FROM_PART, self.span());
            let unit = self.parse_unit();
            self.tree.attach(part, unit);
            self.tree.attach(node, part);
        }
        if self.eat_bold("BY") {
            let part = self.tree.alloc(Attribute::BY_PART, self.span());
            let unit = self.parse_unit();
            self.tree.attach(part, unit);
            self.tree.attach(node, part);
        }
        if self.eat_bold("TO") {
            let part = self.tree.alloc(Attribute::TO_PART, self.span());
            let unit = self.parse_unit();
            self.tree.attach(part, unit);
            self.tree.attach(node, part);
        }
        if self.eat_bold("WHILE") {
            let part = self.tree.alloc(Attribute::WHILE_PART, self.span());
            let serial = self.parse_serial(&[Stop::Bold("DO")]);
            self.tree.attach(part, serial);
            self.tree.attach(node, part);
        }
        self.expect_bold("DO");
        let do_part = self.tree.alloc(Attribute::DO_PART, self.span());
        let body = self.parse_serial(&[Stop::Bold("OD"), Stop::Bold("UNTIL")]);
        self.tree.attach(do_part, body);
        self.tree.attach(node, do_part);
        if self.eat_bold("UNTIL") {
            let part = self.tree.alloc(Attribute::UNTIL_PART, self.span());
            let serial = self.parse_serial(&[Stop::Bold("OD")]);
            self.tree.attach(part, serial);
            self.tree.attach(node, part);
        }
        self.expect_bold("OD");
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Parse {
        let parse = parse_program(source);
        let messages: Vec<String> = parse
            .diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect();
        assert!(parse.ok(), "unexpected syntax errors: {messages:?}");
        parse
    }

    fn root_units(parse: &Parse) -> Vec<Attribute> {
        let root = parse.tree.root().unwrap();
        let serial = parse.tree.child(root, 0).unwrap();
        parse
            .tree
            .children(serial)
            .map(|c| parse.tree.node(c).attr)
            .collect()
    }

    #[test]
    fn parses_a_call_with_a_formula_argument() {
        let parse = parse_ok("print (1 + 2)");
        assert_eq!(root_units(&parse), vec![Attribute::CALL]);
    }

    #[test]
    fn parses_declarations_and_loop() {
        let parse = parse_ok("INT n = 10; REAL s := 0.0; FOR i TO n DO s +:= 1.0 / i OD");
        assert_eq!(
            root_units(&parse),
            vec![
                Attribute::IDENTITY_DECLARATION,
                Attribute::VARIABLE_DECLARATION,
                Attribute::LOOP_CLAUSE,
            ]
        );
    }

    #[test]
    fn parses_mode_and_struct_display() {
        let parse = parse_ok("MODE A = STRUCT (INT n, REF A rest); A head = (1, NIL)");
        let units = root_units(&parse);
        assert_eq!(
            units,
            vec![Attribute::MODE_DECLARATION, Attribute::IDENTITY_DECLARATION]
        );
    }

    #[test]
    fn parses_procedure_with_conditional_body() {
        let parse =
            parse_ok("PROC fib = (INT n) INT: IF n < 2 THEN n ELSE fib (n-1) + fib (n-2) FI");
        assert_eq!(root_units(&parse), vec![Attribute::IDENTITY_DECLARATION]);
    }

    #[test]
    fn dyadic_priorities_nest_formulas() {
        let parse = parse_ok("x := 1 + 2 * 3");
        let root = parse.tree.root().unwrap();
        let serial = parse.tree.child(root, 0).unwrap();
        let assignation = parse.tree.child(serial, 0).unwrap();
        let formula = parse.tree.child(assignation, 1).unwrap();
        assert_eq!(parse.tree.node(formula).attr, Attribute::FORMULA);
        // + is outermost; its right operand holds the tighter *.
        let operator = parse.tree.child(formula, 1).unwrap();
        assert_eq!(parse.tree.node(operator).symbol.as_deref(), Some("+"));
        let rhs = parse.tree.child(formula, 2).unwrap();
        assert_eq!(parse.tree.node(rhs).attr, Attribute::FORMULA);
    }

    #[test]
    fn parses_generator_chain_assignation() {
        let parse = parse_ok("INT i; HEAP INT h := 1; REF INT r := h; r := LOC INT := 2");
        let units = root_units(&parse);
        assert_eq!(units[0], Attribute::VARIABLE_DECLARATION);
        assert_eq!(units[3], Attribute::ASSIGNATION);
    }

    #[test]
    fn parses_slices_and_trimmers() {
        let parse = parse_ok("a [1]; a [2:5]; a [:5]; a [2:]; a [:, 1]");
        assert_eq!(root_units(&parse).len(), 5);
    }

    #[test]
    fn parses_brief_conditional_and_case() {
        parse_ok("x := (a < b | a | b); y := (i | 1, 2, 3 | 0)");
    }

    #[test]
    fn parses_conformity_case() {
        parse_ok("CASE u IN (INT i): print (i), (REAL): print (0) OUT print (2) ESAC");
    }

    #[test]
    fn parses_operator_and_priority_declarations() {
        let parse = parse_ok("PRIO PLUS = 6; OP PLUS = (INT a, INT b) INT: a + b; print (1 PLUS 2)");
        let units = root_units(&parse);
        assert_eq!(units[0], Attribute::PRIORITY_DECLARATION);
        assert_eq!(units[1], Attribute::OPERATOR_DECLARATION);
    }

    #[test]
    fn parses_parallel_clause_and_sema() {
        parse_ok("SEMA s = LEVEL 1; PAR BEGIN DOWN s, UP s END");
    }

    #[test]
    fn parses_row_display_and_empty_display() {
        parse_ok("MODE L = [1 : 0] INT; L empty = (); print (UPB empty)");
    }

    #[test]
    fn missing_semicolon_is_reported() {
        let parse = parse_program("INT a = 1 INT b = 2");
        assert!(parse.diagnostics.has_errors());
    }

    #[test]
    fn stray_character_is_reported() {
        let parse = parse_program("print (?)");
        assert!(parse.diagnostics.has_errors());
    }
}
