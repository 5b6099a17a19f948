//! Grammatical attributes for tree nodes.
//!
//! This enum defines the closed set of syntactic constructs the core
//! recognises, plus the coercion attributes the mode checker inserts.
//! The parser produces the syntactic attributes; the analyser rewrites
//! subtrees with the coercion attributes.

/// All grammatical attributes a node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
#[allow(non_camel_case_types)]
pub enum Attribute {
    // =========================================================================
    // PROGRAM STRUCTURE
    // =========================================================================
    PARTICULAR_PROGRAM = 0,
    SERIAL_CLAUSE,
    ENQUIRY_CLAUSE,
    CLOSED_CLAUSE,
    COLLATERAL_CLAUSE,
    PARALLEL_CLAUSE,
    CONDITIONAL_CLAUSE,
    THEN_PART,
    ELSE_PART,
    CASE_CLAUSE,
    CASE_PART,
    CONFORMITY_CLAUSE,
    SPECIFIED_UNIT,
    OUT_PART,
    LOOP_CLAUSE,
    FOR_PART,
    FROM_PART,
    BY_PART,
    TO_PART,
    WHILE_PART,
    DO_PART,
    UNTIL_PART,
    LABEL,
    /// A unit whose value completes the enclosing serial clause (EXIT).
    COMPLETER,

    // =========================================================================
    // DECLARATIONS
    // =========================================================================
    MODE_DECLARATION,
    PRIORITY_DECLARATION,
    IDENTITY_DECLARATION,
    VARIABLE_DECLARATION,
    OPERATOR_DECLARATION,
    DEFINING_IDENTIFIER,
    DEFINING_INDICANT,
    DEFINING_OPERATOR,

    // =========================================================================
    // DECLARERS
    // =========================================================================
    DECLARER_INDICANT,
    REF_DECLARER,
    FLEX_DECLARER,
    ROW_DECLARER,
    PROC_DECLARER,
    STRUCT_DECLARER,
    FIELD_DECLARER,
    UNION_DECLARER,
    BOUNDS,
    BOUND_PAIR,

    // =========================================================================
    // DENOTATIONS
    // =========================================================================
    INT_DENOTATION,
    REAL_DENOTATION,
    BOOL_DENOTATION,
    CHAR_DENOTATION,
    STRING_DENOTATION,
    BITS_DENOTATION,

    // =========================================================================
    // UNITS
    // =========================================================================
    IDENTIFIER,
    OPERATOR,
    FORMULA,
    MONADIC_FORMULA,
    CALL,
    SLICE,
    SUBSCRIPT,
    TRIMMER,
    SELECTION,
    ASSIGNATION,
    IDENTITY_RELATION,
    CAST,
    ROUTINE_TEXT,
    PARAMETER,
    GENERATOR,
    JUMP,
    SKIP,
    NIHIL,

    // =========================================================================
    // COERCIONS (inserted by the analyser)
    // =========================================================================
    DEREFERENCING,
    DEPROCEDURING,
    WIDENING,
    ROWING,
    UNITING,
    VOIDING,

    // =========================================================================
    // SYNTHETIC
    // =========================================================================
    ERROR,
}

impl Attribute {
    /// Attributes produced by the coercion inserter rather than the parser.
    pub fn is_coercion(self) -> bool {
        matches!(
            self,
            Attribute::DEREFERENCING
                | Attribute::DEPROCEDURING
                | Attribute::WIDENING
                | Attribute::ROWING
                | Attribute::UNITING
                | Attribute::VOIDING
        )
    }

    /// Ranges that introduce a fresh symbol table.
    pub fn introduces_range(self) -> bool {
        matches!(
            self,
            Attribute::PARTICULAR_PROGRAM
                | Attribute::CLOSED_CLAUSE
                | Attribute::ENQUIRY_CLAUSE
                | Attribute::THEN_PART
                | Attribute::ELSE_PART
                | Attribute::CASE_PART
                | Attribute::SPECIFIED_UNIT
                | Attribute::OUT_PART
                | Attribute::LOOP_CLAUSE
                | Attribute::WHILE_PART
                | Attribute::DO_PART
                | Attribute::UNTIL_PART
                | Attribute::ROUTINE_TEXT
        )
    }

    /// Human-readable name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Attribute::PARTICULAR_PROGRAM => "particular program",
            Attribute::SERIAL_CLAUSE => "serial clause",
            Attribute::ENQUIRY_CLAUSE => "enquiry clause",
            Attribute::CLOSED_CLAUSE => "closed clause",
            Attribute::COLLATERAL_CLAUSE => "collateral clause",
            Attribute::PARALLEL_CLAUSE => "parallel clause",
            Attribute::CONDITIONAL_CLAUSE => "conditional clause",
            Attribute::THEN_PART => "then part",
            Attribute::ELSE_PART => "else part",
            Attribute::CASE_CLAUSE => "case clause",
            Attribute::CASE_PART => "case part",
            Attribute::CONFORMITY_CLAUSE => "conformity clause",
            Attribute::SPECIFIED_UNIT => "specified unit",
            Attribute::OUT_PART => "out part",
            Attribute::LOOP_CLAUSE => "loop clause",
            Attribute::FOR_PART => "for part",
            Attribute::FROM_PART => "from part",
            Attribute::BY_PART => "by part",
            Attribute::TO_PART => "to part",
            Attribute::WHILE_PART => "while part",
            Attribute::DO_PART => "do part",
            Attribute::UNTIL_PART => "until part",
            Attribute::LABEL => "label",
            Attribute::COMPLETER => "completer",
            Attribute::MODE_DECLARATION => "mode declaration",
            Attribute::PRIORITY_DECLARATION => "priority declaration",
            Attribute::IDENTITY_DECLARATION => "identity declaration",
            Attribute::VARIABLE_DECLARATION => "variable declaration",
            Attribute::OPERATOR_DECLARATION => "operator declaration",
            Attribute::DEFINING_IDENTIFIER => "defining identifier",
            Attribute::DEFINING_INDICANT => "defining indicant",
            Attribute::DEFINING_OPERATOR => "defining operator",
            Attribute::DECLARER_INDICANT => "declarer",
            Attribute::REF_DECLARER => "reference declarer",
            Attribute::FLEX_DECLARER => "flexible declarer",
            Attribute::ROW_DECLARER => "row declarer",
            Attribute::PROC_DECLARER => "procedure declarer",
            Attribute::STRUCT_DECLARER => "structure declarer",
            Attribute::FIELD_DECLARER => "field declarer",
            Attribute::UNION_DECLARER => "union declarer",
            Attribute::BOUNDS => "bounds",
            Attribute::BOUND_PAIR => "bound pair",
            Attribute::INT_DENOTATION => "integral denotation",
            Attribute::REAL_DENOTATION => "real denotation",
            Attribute::BOOL_DENOTATION => "boolean denotation",
            Attribute::CHAR_DENOTATION => "character denotation",
            Attribute::STRING_DENOTATION => "string denotation",
            Attribute::BITS_DENOTATION => "bits denotation",
            Attribute::IDENTIFIER => "identifier",
            Attribute::OPERATOR => "operator",
            Attribute::FORMULA => "formula",
            Attribute::MONADIC_FORMULA => "monadic formula",
            Attribute::CALL => "call",
            Attribute::SLICE => "slice",
            Attribute::SUBSCRIPT => "subscript",
            Attribute::TRIMMER => "trimmer",
            Attribute::SELECTION => "selection",
            Attribute::ASSIGNATION => "assignation",
            Attribute::IDENTITY_RELATION => "identity relation",
            Attribute::CAST => "cast",
            Attribute::ROUTINE_TEXT => "routine text",
            Attribute::PARAMETER => "parameter",
            Attribute::GENERATOR => "generator",
            Attribute::JUMP => "jump",
            Attribute::SKIP => "skip",
            Attribute::NIHIL => "nil",
            Attribute::DEREFERENCING => "dereferencing",
            Attribute::DEPROCEDURING => "deproceduring",
            Attribute::WIDENING => "widening",
            Attribute::ROWING => "rowing",
            Attribute::UNITING => "uniting",
            Attribute::VOIDING => "voiding",
            Attribute::ERROR => "error",
        }
    }
}
