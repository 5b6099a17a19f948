//! Static analysis suites: accumulated diagnostics, mode declarations,
//! coercion failures, scope warnings.

use a68::{A68Error, Interpreter, Severity};

fn analysed(source: &str) -> Interpreter {
    let mut interpreter = Interpreter::new(source);
    let _ = interpreter.analyse();
    interpreter
}

fn messages(interpreter: &Interpreter) -> Vec<String> {
    interpreter
        .diagnostics()
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn has_error_containing(interpreter: &Interpreter, needle: &str) -> bool {
    interpreter
        .diagnostics()
        .iter()
        .any(|d| d.severity.is_error() && d.message.contains(needle))
}

fn has_warning_containing(interpreter: &Interpreter, needle: &str) -> bool {
    interpreter
        .diagnostics()
        .iter()
        .any(|d| !d.severity.is_error() && d.message.contains(needle))
}

// ---------------------------------------------------------------------------
// tag binding
// ---------------------------------------------------------------------------

#[test]
fn undeclared_tag_is_reported() {
    let interpreter = analysed("print (nowhere)");
    assert!(
        has_error_containing(&interpreter, "not been declared"),
        "{:?}",
        messages(&interpreter)
    );
}

#[test]
fn multiple_declaration_in_one_range_is_reported() {
    let interpreter = analysed("INT x = 1; REAL x = 2.0");
    assert!(has_error_containing(&interpreter, "more than once"));
}

#[test]
fn shadowing_in_a_nested_range_is_fine() {
    let interpreter = analysed("INT x = 1; BEGIN INT x = 2; print (x) END");
    assert!(!interpreter.diagnostics().has_errors());
}

#[test]
fn hiding_a_prelude_tag_is_a_warning_not_an_error() {
    let interpreter = analysed("REAL pi = 3.0; print (pi)");
    assert!(!interpreter.diagnostics().has_errors());
    assert!(has_warning_containing(&interpreter, "hides a standard prelude"));
}

#[test]
fn unused_tag_gets_a_warning() {
    let interpreter = analysed("INT lonely = 1; print (2)");
    assert!(has_warning_containing(&interpreter, "never used"));
}

#[test]
fn errors_accumulate_instead_of_stopping() {
    let interpreter = analysed("print (first missing); print (second missing)");
    let count = interpreter
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::SemanticError)
        .count();
    assert!(count >= 2, "{:?}", messages(&interpreter));
}

// ---------------------------------------------------------------------------
// mode declarations
// ---------------------------------------------------------------------------

#[test]
fn direct_mode_cycle_is_ill_formed() {
    let interpreter = analysed("MODE A = A; A x = SKIP");
    assert!(has_error_containing(&interpreter, "not well formed"));
}

#[test]
fn bare_ref_cycle_is_ill_formed() {
    let interpreter = analysed("MODE A = REF A; print (1)");
    assert!(has_error_containing(&interpreter, "not well formed"));
}

#[test]
fn ref_cycle_through_a_structure_is_accepted() {
    let interpreter = analysed("MODE A = STRUCT (INT n, REF A rest); print (1)");
    assert!(
        !has_error_containing(&interpreter, "not well formed"),
        "{:?}",
        messages(&interpreter)
    );
}

#[test]
fn mutually_recursive_modes_resolve() {
    let interpreter =
        analysed("MODE A = STRUCT (INT n, REF B next); MODE B = STRUCT (REF A back); print (1)");
    assert!(!interpreter.diagnostics().has_errors());
}

#[test]
fn firmly_related_union_members_are_rejected() {
    let interpreter = analysed("MODE U = UNION (INT, REF INT); print (1)");
    assert!(has_error_containing(&interpreter, "firmly related"));
}

#[test]
fn unrelated_union_members_are_accepted() {
    let interpreter = analysed("MODE U = UNION (INT, CHAR, [] REAL); print (1)");
    assert!(!interpreter.diagnostics().has_errors());
}

#[test]
fn firmly_related_operator_overloads_are_rejected() {
    let source = "OP NEW = (INT a) INT: a; OP NEW = (REF INT a) INT: 0; print (1)";
    let interpreter = analysed(source);
    assert!(has_error_containing(&interpreter, "firmly related"));
}

// ---------------------------------------------------------------------------
// coercion failures
// ---------------------------------------------------------------------------

#[test]
fn assigning_a_bool_to_an_int_cannot_coerce() {
    let interpreter = analysed("INT i := TRUE");
    assert!(has_error_containing(&interpreter, "cannot coerce"));
}

#[test]
fn narrowing_real_to_int_cannot_coerce() {
    let interpreter = analysed("INT i := 1.5");
    assert!(has_error_containing(&interpreter, "cannot coerce"));
}

#[test]
fn assigning_to_a_value_is_rejected() {
    let interpreter = analysed("INT n = 1; n := 2");
    assert!(has_error_containing(&interpreter, "cannot assign"));
}

#[test]
fn calling_a_non_procedure_is_rejected() {
    let interpreter = analysed("INT n = 1; n (2)");
    assert!(has_error_containing(&interpreter, "cannot call"));
}

#[test]
fn selecting_a_missing_field_is_rejected() {
    let interpreter = analysed("STRUCT (INT x) s = (1); print (y OF s)");
    assert!(has_error_containing(&interpreter, "no field"));
}

#[test]
fn slicing_with_the_wrong_dimension_count() {
    let interpreter = analysed("[,] INT a; print (a [1])");
    assert!(has_error_containing(&interpreter, "dimensions"));
}

#[test]
fn no_matching_operator_is_reported() {
    let interpreter = analysed("print (TRUE + 1)");
    assert!(has_error_containing(&interpreter, "no operator"));
}

#[test]
fn unbalanced_conditional_in_a_firm_position() {
    // INT and STRING have no common strong target apart from a union,
    // which the formula's operands cannot accept.
    let interpreter = analysed(r#"print (1 + IF TRUE THEN 2 ELSE "x" FI)"#);
    assert!(interpreter.diagnostics().has_errors());
}

// ---------------------------------------------------------------------------
// static scopes
// ---------------------------------------------------------------------------

#[test]
fn escaping_name_is_flagged_before_evaluation() {
    let interpreter = analysed("REF INT r := LOC INT; BEGIN INT inner; r := inner END");
    assert!(has_warning_containing(&interpreter, "survive its scope"));
}

#[test]
fn analysis_error_blocks_the_run() {
    let mut interpreter = Interpreter::new("print (missing)");
    match interpreter.run() {
        Err(A68Error::Analysis(count)) => assert!(count >= 1),
        other => panic!("expected an analysis failure, got {other:?}"),
    }
}

#[test]
fn syntax_error_blocks_the_run() {
    let mut interpreter = Interpreter::new("BEGIN print (1)");
    match interpreter.run() {
        Err(A68Error::Syntax(count)) => assert!(count >= 1),
        other => panic!("expected a syntax failure, got {other:?}"),
    }
}
