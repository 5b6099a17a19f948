//! End-to-end scenarios: whole programs in, observable output out.

use a68::run_program;

fn output_of(source: &str) -> String {
    match run_program(source) {
        Ok(output) => output,
        Err(error) => panic!("program failed: {error}\nsource: {source}"),
    }
}

fn printed_f64(source: &str) -> f64 {
    let output = output_of(source);
    output
        .trim()
        .parse::<f64>()
        .unwrap_or_else(|_| panic!("unparseable output {output:?}"))
}

#[test]
fn addition_prints_in_the_default_whole_format() {
    // Width is INT_WIDTH + 1, right justified, with an explicit sign.
    assert_eq!(output_of("print (1 + 2)"), "         +3");
}

#[test]
fn harmonic_sum_of_ten_terms() {
    let value = printed_f64("INT n = 10; REAL s := 0.0; FOR i TO n DO s +:= 1.0 / i OD; print (s)");
    assert!((value - 2.9289682539682538).abs() < 1e-10);
}

#[test]
fn empty_row_has_upb_zero_and_lwb_one() {
    let upb = output_of("MODE L = [1 : 0] INT; L empty = (); print (UPB empty)");
    assert_eq!(upb.trim(), "+0");
    let lwb = output_of("MODE L = [1 : 0] INT; L empty = (); print (LWB empty)");
    assert_eq!(lwb.trim(), "+1");
}

#[test]
fn recursive_mode_with_ref_cycle() {
    let output = output_of("MODE A = STRUCT (INT n, REF A rest); A head = (1, NIL); print (n OF head)");
    assert_eq!(output.trim(), "+1");
}

#[test]
fn recursive_fibonacci() {
    let output = output_of(
        "PROC fib = (INT n) INT: IF n < 2 THEN n ELSE fib (n-1) + fib (n-2) FI; print (fib (10))",
    );
    assert_eq!(output.trim(), "+55");
}

#[test]
fn frame_name_escaping_to_heap_is_a_runtime_scope_error() {
    let result = run_program("INT i; HEAP INT h := 1; REF INT r := h; r := LOC INT := 2");
    let error = result.expect_err("the second assignation must be rejected");
    assert!(
        error.to_string().contains("scope"),
        "unexpected error: {error}"
    );
}

// ---------------------------------------------------------------------------
// further whole programs
// ---------------------------------------------------------------------------

#[test]
fn conditional_balances_int_and_real() {
    let value = printed_f64("print (IF TRUE THEN 1 ELSE 2.5 FI)");
    assert_eq!(value, 1.0);
}

#[test]
fn brief_conditional_and_case() {
    assert_eq!(output_of("INT a = 3, b = 5; print ((a < b | a | b))").trim(), "+3");
    assert_eq!(output_of("INT i = 2; print ((i | 10, 20, 30 | 0))").trim(), "+20");
}

#[test]
fn case_clause_falls_through_to_out() {
    let source = "INT i = 7; print (CASE i IN 10, 20 OUT 99 ESAC)";
    assert_eq!(output_of(source).trim(), "+99");
}

#[test]
fn conformity_clause_dispatches_on_the_runtime_tag() {
    let source = "UNION (INT, REAL) u = 1; CASE u IN (INT i): print (i), (REAL): print (0) ESAC";
    assert_eq!(output_of(source).trim(), "+1");
}

#[test]
fn conformity_out_part_when_nothing_conforms() {
    let source = "UNION (INT, CHAR) u = \"x\"; CASE u IN (INT i): print (i) OUT print (9) ESAC";
    assert_eq!(output_of(source).trim(), "+9");
}

#[test]
fn while_loop_with_until_post_condition() {
    let source = "INT i := 0; WHILE i < 100 DO i +:= 7 UNTIL i > 30 OD; print (i)";
    assert_eq!(output_of(source).trim(), "+35");
}

#[test]
fn loop_from_by_to_counts_down() {
    let source = "INT s := 0; FOR i FROM 10 BY -2 TO 2 DO s +:= i OD; print (s)";
    assert_eq!(output_of(source).trim(), "+30");
}

#[test]
fn goto_restarts_at_a_label() {
    let source = "INT i := 0; again: i +:= 1; IF i < 3 THEN GOTO again FI; print (i)";
    assert_eq!(output_of(source).trim(), "+3");
}

#[test]
fn exit_completes_a_closed_clause() {
    let source = "print (BEGIN 41 + 1 EXIT 0 END)";
    assert_eq!(output_of(source).trim(), "+42");
}

#[test]
fn rows_slice_and_trim() {
    let source = "[] INT a = (10, 20, 30, 40); print (a [3])";
    assert_eq!(output_of(source).trim(), "+30");
    let source = "[] INT a = (10, 20, 30, 40); [] INT b = a [2 : 3]; print (UPB b - LWB b)";
    assert_eq!(output_of(source).trim(), "+1");
}

#[test]
fn row_assignment_copies_elements() {
    let source = "[3] INT a; FOR i TO 3 DO a [i] := i OD; [3] INT b; b := a; a [1] := 99; print (b [1])";
    assert_eq!(output_of(source).trim(), "+1");
}

#[test]
fn flexible_string_grows_across_assignations() {
    let source = r#"STRING s := "ab"; s := s + "cd"; print (UPB s)"#;
    assert_eq!(output_of(source).trim(), "+4");
}

#[test]
fn string_concatenation_prints_text() {
    let source = r#"print ("he" + "llo")"#;
    assert_eq!(output_of(source), "hello");
}

#[test]
fn structure_of_rows_multiple_selection() {
    let source = "MODE P = STRUCT (INT x, INT y); [] P ps = ((1, 2), (3, 4)); print (x OF ps [2])";
    assert_eq!(output_of(source).trim(), "+3");
}

#[test]
fn procedures_capture_their_environ() {
    let source = "INT base = 100; PROC add = (INT n) INT: base + n; print (add (11))";
    assert_eq!(output_of(source).trim(), "+111");
}

#[test]
fn user_operator_with_priority() {
    let source = "PRIO MAX = 6; OP MAX = (INT a, INT b) INT: IF a > b THEN a ELSE b FI; print (3 MAX 8)";
    assert_eq!(output_of(source).trim(), "+8");
}

#[test]
fn monadic_operators_bind_tightest() {
    assert_eq!(output_of("print (ABS - 5)").trim(), "+5");
    assert_eq!(output_of("print (- 2 ** 2)").trim(), "+4");
}

#[test]
fn identity_relations_compare_names() {
    let source = "INT i; REF INT r = i; print (r IS i)";
    assert_eq!(output_of(source), "T");
    let source = "INT i; INT j; print (i :/=: j)";
    assert_eq!(output_of(source), "T");
}

#[test]
fn heap_generators_survive_their_frame() {
    let source =
        "REF INT keep = BEGIN REF INT r = HEAP INT; r := 17; r END; print (keep)";
    // keep is REF INT; printing dereferences it.
    assert_eq!(output_of(source).trim(), "+17");
}

#[test]
fn parallel_clause_with_semaphore() {
    let source = "SEMA s = LEVEL 1; INT hits := 0; PAR BEGIN (DOWN s; hits +:= 1; UP s), (DOWN s; hits +:= 1; UP s) END; print (hits)";
    assert_eq!(output_of(source).trim(), "+2");
}

#[test]
fn widening_reaches_complex() {
    let source = "COMPL z = 3; print (RE z + IM z)";
    let value = printed_f64(source);
    assert_eq!(value, 3.0);
}

#[test]
fn bits_operations() {
    assert_eq!(output_of("print (ABS (2r1010 AND 2r0110))").trim(), "+2");
    assert_eq!(output_of("print (ABS (BIN 5 OR BIN 2))").trim(), "+7");
}

#[test]
fn lengthety_identifier_mapping() {
    // longpi maps onto pi when no exact tag exists.
    let value = printed_f64("print (longpi)");
    assert!((value - std::f64::consts::PI).abs() < 1e-12);
}

#[test]
fn multi_word_identifiers_reach_environment_enquiries() {
    let source = "print (max int)";
    assert_eq!(output_of(source).trim(), "+2147483647");
}

#[test]
fn cast_forces_a_strong_context() {
    let value = printed_f64("print (REAL (3))");
    assert_eq!(value, 3.0);
}

#[test]
fn mode_indicants_are_transparent_across_declarations() {
    let source = "MODE MILES = REAL; MILES m = 2.5; REAL r = m; print (r + m)";
    let value = printed_f64(source);
    assert_eq!(value, 5.0);
}

#[test]
fn nested_ranges_shadow_outer_identifiers() {
    let source = "INT x = 1; print (BEGIN INT x = 2; x END + x)";
    assert_eq!(output_of(source).trim(), "+3");
}
