//! Runtime failure semantics and storage behaviour.

use a68::{A68Error, run_program};

fn runtime_error(source: &str) -> String {
    match run_program(source) {
        Err(A68Error::Runtime(message)) => message,
        Ok(output) => panic!("expected a runtime error, got output {output:?}"),
        Err(other) => panic!("expected a runtime error, got {other}"),
    }
}

#[test]
fn nil_dereference_is_a_runtime_error() {
    let message = runtime_error("REF INT r = NIL; print (r)");
    assert!(message.contains("NIL"), "{message}");
}

#[test]
fn nil_assignment_is_a_runtime_error() {
    let message = runtime_error("REF INT r = NIL; r := 1");
    assert!(message.contains("NIL"), "{message}");
}

#[test]
fn uninitialised_access_is_a_runtime_error() {
    let message = runtime_error("INT i; print (i)");
    assert!(message.contains("uninitialised"), "{message}");
}

#[test]
fn index_out_of_bounds_is_a_runtime_error() {
    let message = runtime_error("[3] INT a; FOR i TO 3 DO a [i] := i OD; print (a [4])");
    assert!(message.contains("bounds"), "{message}");
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let message = runtime_error("INT z = 0; print (1 OVER z)");
    assert!(message.contains("division by zero"), "{message}");

    let message = runtime_error("REAL z = 0.0; print (1.0 / z)");
    assert!(message.contains("division by zero"), "{message}");
}

#[test]
fn integral_overflow_is_a_runtime_error() {
    let message = runtime_error("print (max int + 1)");
    assert!(message.contains("overflow"), "{message}");
}

#[test]
fn row_bound_mismatch_in_assignation() {
    let message = runtime_error("[3] INT a; [2] INT b; FOR i TO 2 DO b [i] := i OD; a := b");
    assert!(message.contains("bounds"), "{message}");
}

#[test]
fn unbounded_recursion_overflows_the_frame_stack() {
    let message = runtime_error("PROC down = (INT n) INT: down (n + 1); print (down (0))");
    assert!(message.contains("too complex") || message.contains("overflow"), "{message}");
}

#[test]
fn down_on_a_zero_semaphore_deadlocks() {
    let message = runtime_error("SEMA s = LEVEL 0; PAR BEGIN DOWN s END");
    assert!(message.contains("deadlock"), "{message}");
}

#[test]
fn math_functions_reject_bad_arguments() {
    let message = runtime_error("print (sqrt (-1.0))");
    assert!(message.contains("undefined"), "{message}");
}

#[test]
fn conformity_without_a_match_yields_an_undefined_value() {
    // No OUT part and no conforming specifier: using the yield fails.
    let message =
        runtime_error("UNION (INT, CHAR) u = \"x\"; print (CASE u IN (INT i): i ESAC)");
    assert!(message.contains("uninitialised"), "{message}");
}

// ---------------------------------------------------------------------------
// storage and collection
// ---------------------------------------------------------------------------

#[test]
fn garbage_rows_are_collected_across_iterations() {
    // Each iteration abandons the previous flexible string; the heap stays
    // bounded only because unreachable descriptors are reclaimed.
    let source = r#"
        STRING s := "";
        FOR i TO 2000 DO
            s := "";
            FOR j TO 10 DO s +:= "x" OD
        OD;
        print (UPB s)
    "#;
    assert_eq!(run_program(source).unwrap().trim(), "+10");
}

#[test]
fn heap_values_survive_collection_while_reachable() {
    let source = r#"
        MODE NODE = STRUCT (INT n, REF NODE rest);
        REF NODE head := NIL;
        FOR i TO 100 DO
            HEAP NODE cell := (i, head);
            head := cell
        OD;
        INT total := 0;
        WHILE head ISNT REF NODE (NIL) DO
            total +:= n OF head;
            head := rest OF head
        OD;
        print (total)
    "#;
    assert_eq!(run_program(source).unwrap().trim(), "+5050");
}
