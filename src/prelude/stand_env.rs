//! Population of the standard environ.
//!
//! Every prelude operator and identifier gets a tag in table 0 whose
//! implementation is an entry in the intrinsic registry; the evaluator
//! dispatches through the tag's intrinsic id. Operand modes are declared
//! exactly, so operator identification stays a firm-context search; the
//! mixed INT/REAL spellings are separate entries sharing one implementation.

use crate::genie::{Eval, Genie, Interrupt, IntrinsicFn, IntrinsicId, Value};
use crate::mode::{ModeId, ModeTable};
use crate::semantic::{SymbolTables, TagKind};

use super::transput::{self, INT_WIDTH, REAL_WIDTH};

/// Fill the standard environ and return the intrinsic registry.
pub fn populate_standard_environ(
    modes: &mut ModeTable,
    tabs: &mut SymbolTables,
) -> Vec<IntrinsicFn> {
    let mut env = Environ {
        modes,
        tabs,
        registry: Vec::new(),
    };
    env.arithmetic();
    env.relations();
    env.monadics();
    env.rows_and_strings();
    env.bits();
    env.complex();
    env.semaphores();
    env.becomes_operators();
    env.identifiers();
    env.registry
}

struct Environ<'a> {
    modes: &'a mut ModeTable,
    tabs: &'a mut SymbolTables,
    registry: Vec<IntrinsicFn>,
}

impl Environ<'_> {
    fn op(&mut self, name: &str, params: &[ModeId], result: ModeId, f: IntrinsicFn) {
        let mode = self.modes.procedure(params.to_vec(), result);
        let standard = self.tabs.standard();
        let tag = self
            .tabs
            .insert(standard, TagKind::Operator, name.into())
            .expect("operators always insert");
        let entry = self.tabs.tag_mut(tag);
        entry.mode = Some(mode);
        entry.in_prelude = true;
        entry.intrinsic = Some(IntrinsicId(self.registry.len() as u32));
        self.registry.push(f);
    }

    fn ident(&mut self, name: &str, mode: ModeId, f: IntrinsicFn) {
        let standard = self.tabs.standard();
        let tag = self
            .tabs
            .insert(standard, TagKind::Identifier, name.into())
            .expect("fresh prelude identifier");
        let entry = self.tabs.tag_mut(tag);
        entry.mode = Some(mode);
        entry.in_prelude = true;
        entry.intrinsic = Some(IntrinsicId(self.registry.len() as u32));
        self.registry.push(f);
    }

    fn proc_ident(&mut self, name: &str, params: &[ModeId], result: ModeId, f: IntrinsicFn) {
        let mode = self.modes.procedure(params.to_vec(), result);
        self.ident(name, mode, f);
    }

    /// The union `print` and friends accept.
    fn simplout(&mut self) -> ModeId {
        let members = vec![
            self.modes.int_mode,
            self.modes.long_int_mode,
            self.modes.real_mode,
            self.modes.bool_mode,
            self.modes.char_mode,
            self.modes.bits_mode,
            self.modes.long_bits_mode,
            self.modes.row_of_char_mode,
            self.modes.complex_mode,
        ];
        self.modes.union_of(members)
    }

    // ========================================================================
    // OPERATOR TABLES
    // ========================================================================

    fn arithmetic(&mut self) {
        let int = self.modes.int_mode;
        let real = self.modes.real_mode;
        let long_int = self.modes.long_int_mode;

        self.op("+", &[int, int], int, int_add);
        self.op("-", &[int, int], int, int_sub);
        self.op("*", &[int, int], int, int_mul);
        self.op("OVER", &[int, int], int, int_over);
        self.op("MOD", &[int, int], int, int_mod);
        self.op("**", &[int, int], int, int_pow);
        self.op("/", &[int, int], real, real_div);

        self.op("+", &[real, real], real, real_add);
        self.op("-", &[real, real], real, real_sub);
        self.op("*", &[real, real], real, real_mul);
        self.op("/", &[real, real], real, real_div);
        self.op("**", &[real, int], real, real_pow_int);

        for mixed in [[int, real], [real, int]] {
            self.op("+", &mixed, real, real_add);
            self.op("-", &mixed, real, real_sub);
            self.op("*", &mixed, real, real_mul);
            self.op("/", &mixed, real, real_div);
        }

        self.op("+", &[long_int, long_int], long_int, long_add);
        self.op("-", &[long_int, long_int], long_int, long_sub);
        self.op("*", &[long_int, long_int], long_int, long_mul);
        self.op("OVER", &[long_int, long_int], long_int, long_over);
        self.op("MOD", &[long_int, long_int], long_int, long_mod);
    }

    fn relations(&mut self) {
        let int = self.modes.int_mode;
        let real = self.modes.real_mode;
        let long_int = self.modes.long_int_mode;
        let bool_ = self.modes.bool_mode;
        let char_ = self.modes.char_mode;
        let string = self.modes.string_mode;

        for operands in [[int, int], [real, real], [int, real], [real, int]] {
            self.op("=", &operands, bool_, num_eq);
            self.op("/=", &operands, bool_, num_ne);
            self.op("<", &operands, bool_, num_lt);
            self.op("<=", &operands, bool_, num_le);
            self.op(">", &operands, bool_, num_gt);
            self.op(">=", &operands, bool_, num_ge);
        }
        self.op("=", &[long_int, long_int], bool_, num_eq);
        self.op("/=", &[long_int, long_int], bool_, num_ne);
        self.op("<", &[long_int, long_int], bool_, num_lt);
        self.op("<=", &[long_int, long_int], bool_, num_le);
        self.op(">", &[long_int, long_int], bool_, num_gt);
        self.op(">=", &[long_int, long_int], bool_, num_ge);

        self.op("AND", &[bool_, bool_], bool_, bool_and);
        self.op("OR", &[bool_, bool_], bool_, bool_or);
        self.op("=", &[bool_, bool_], bool_, bool_eq);
        self.op("/=", &[bool_, bool_], bool_, bool_ne);

        self.op("=", &[char_, char_], bool_, char_eq);
        self.op("/=", &[char_, char_], bool_, char_ne);
        self.op("<", &[char_, char_], bool_, char_lt);
        self.op("<=", &[char_, char_], bool_, char_le);
        self.op(">", &[char_, char_], bool_, char_gt);
        self.op(">=", &[char_, char_], bool_, char_ge);

        self.op("=", &[string, string], bool_, string_eq);
        self.op("/=", &[string, string], bool_, string_ne);
    }

    fn monadics(&mut self) {
        let int = self.modes.int_mode;
        let real = self.modes.real_mode;
        let long_int = self.modes.long_int_mode;
        let long_real = self.modes.long_real_mode;
        let bool_ = self.modes.bool_mode;
        let char_ = self.modes.char_mode;

        self.op("-", &[int], int, int_neg);
        self.op("+", &[int], int, identity);
        self.op("ABS", &[int], int, int_abs);
        self.op("SIGN", &[int], int, int_sign);
        self.op("ODD", &[int], bool_, int_odd);

        self.op("-", &[real], real, real_neg);
        self.op("+", &[real], real, identity);
        self.op("ABS", &[real], real, real_abs);
        self.op("SIGN", &[real], int, real_sign);
        self.op("ENTIER", &[real], int, real_entier);
        self.op("ROUND", &[real], int, real_round);

        self.op("-", &[long_int], long_int, long_neg);
        self.op("ABS", &[long_int], long_int, long_abs);
        self.op("LENG", &[int], long_int, int_leng);
        self.op("SHORTEN", &[long_int], int, long_shorten);
        self.op("LENG", &[real], long_real, identity);
        self.op("SHORTEN", &[long_real], real, identity);

        self.op("NOT", &[bool_], bool_, bool_not);
        self.op("ABS", &[bool_], int, bool_abs);

        self.op("ABS", &[char_], int, char_abs);
        self.op("REPR", &[int], char_, int_repr);
    }

    fn rows_and_strings(&mut self) {
        let int = self.modes.int_mode;
        let rows = self.modes.rows_mode;
        let char_ = self.modes.char_mode;
        let string = self.modes.string_mode;

        self.op("UPB", &[rows], int, row_upb);
        self.op("LWB", &[rows], int, row_lwb);
        self.op("UPB", &[int, rows], int, row_upb_dyadic);
        self.op("LWB", &[int, rows], int, row_lwb_dyadic);

        for operands in [
            [string, string],
            [string, char_],
            [char_, string],
            [char_, char_],
        ] {
            self.op("+", &operands, string, string_concat);
        }
    }

    fn bits(&mut self) {
        let int = self.modes.int_mode;
        let bool_ = self.modes.bool_mode;
        let bits = self.modes.bits_mode;

        self.op("AND", &[bits, bits], bits, bits_and);
        self.op("OR", &[bits, bits], bits, bits_or);
        self.op("=", &[bits, bits], bool_, bits_eq);
        self.op("/=", &[bits, bits], bool_, bits_ne);
        self.op("NOT", &[bits], bits, bits_not);
        self.op("ABS", &[bits], int, bits_abs);
        self.op("BIN", &[int], bits, int_bin);
        self.op("UP", &[bits, int], bits, bits_shl);
        self.op("DOWN", &[bits, int], bits, bits_shr);
        self.op("ELEM", &[int, bits], bool_, bits_elem);
    }

    fn complex(&mut self) {
        let real = self.modes.real_mode;
        let bool_ = self.modes.bool_mode;
        let compl = self.modes.complex_mode;

        self.op("+", &[compl, compl], compl, compl_add);
        self.op("-", &[compl, compl], compl, compl_sub);
        self.op("*", &[compl, compl], compl, compl_mul);
        self.op("/", &[compl, compl], compl, compl_div);
        self.op("=", &[compl, compl], bool_, compl_eq);
        self.op("/=", &[compl, compl], bool_, compl_ne);
        self.op("-", &[compl], compl, compl_neg);
        self.op("RE", &[compl], real, compl_re);
        self.op("IM", &[compl], real, compl_im);
        self.op("CONJ", &[compl], compl, compl_conj);
        self.op("ABS", &[compl], real, compl_abs);
        self.op("ARG", &[compl], real, compl_arg);
    }

    fn semaphores(&mut self) {
        let int = self.modes.int_mode;
        let void = self.modes.void_mode;
        let sema = self.modes.sema_mode;

        self.op("LEVEL", &[int], sema, sema_level);
        self.op("LEVEL", &[sema], int, sema_value);
        self.op("UP", &[sema], void, sema_up);
        self.op("DOWN", &[sema], void, sema_down);
    }

    fn becomes_operators(&mut self) {
        let int = self.modes.int_mode;
        let real = self.modes.real_mode;
        let long_int = self.modes.long_int_mode;
        let char_ = self.modes.char_mode;
        let string = self.modes.string_mode;
        let ref_int = self.modes.reference_to(int);
        let ref_real = self.modes.reference_to(real);
        let ref_long_int = self.modes.reference_to(long_int);
        let ref_string = self.modes.reference_to(string);

        self.op("+:=", &[ref_int, int], ref_int, plusab_int);
        self.op("-:=", &[ref_int, int], ref_int, minusab_int);
        self.op("*:=", &[ref_int, int], ref_int, timesab_int);
        self.op("OVER:=", &[ref_int, int], ref_int, overab_int);
        self.op("MOD:=", &[ref_int, int], ref_int, modab_int);

        for source in [real, int] {
            self.op("+:=", &[ref_real, source], ref_real, plusab_real);
            self.op("-:=", &[ref_real, source], ref_real, minusab_real);
            self.op("*:=", &[ref_real, source], ref_real, timesab_real);
            self.op("/:=", &[ref_real, source], ref_real, divab_real);
        }
        self.op("+:=", &[ref_long_int, long_int], ref_long_int, plusab_long);
        self.op("+:=", &[ref_string, string], ref_string, plusab_string);
        self.op("+:=", &[ref_string, char_], ref_string, plusab_string);
    }

    // ========================================================================
    // IDENTIFIER TABLES
    // ========================================================================

    fn identifiers(&mut self) {
        let int = self.modes.int_mode;
        let real = self.modes.real_mode;
        let long_int = self.modes.long_int_mode;
        let char_ = self.modes.char_mode;
        let void = self.modes.void_mode;
        let simplout = self.simplout();
        let row_simplout = self.modes.row(1, simplout);

        self.proc_ident("print", &[row_simplout], void, genie_print);
        self.proc_ident("write", &[row_simplout], void, genie_print);

        self.proc_ident("sqrt", &[real], real, math_sqrt);
        self.proc_ident("exp", &[real], real, math_exp);
        self.proc_ident("ln", &[real], real, math_ln);
        self.proc_ident("log", &[real], real, math_log);
        self.proc_ident("sin", &[real], real, math_sin);
        self.proc_ident("cos", &[real], real, math_cos);
        self.proc_ident("tan", &[real], real, math_tan);
        self.proc_ident("arcsin", &[real], real, math_arcsin);
        self.proc_ident("arccos", &[real], real, math_arccos);
        self.proc_ident("arctan", &[real], real, math_arctan);

        self.ident("pi", real, const_pi);
        self.ident("maxint", int, const_max_int);
        self.ident("longmaxint", long_int, const_long_max_int);
        self.ident("maxreal", real, const_max_real);
        self.ident("smallreal", real, const_small_real);
        self.ident("intwidth", int, const_int_width);
        self.ident("longintwidth", int, const_long_int_width);
        self.ident("realwidth", int, const_real_width);
        self.ident("bitswidth", int, const_bits_width);
        self.ident("maxabschar", int, const_max_abs_char);

        self.ident("newline", char_, const_newline);
        self.ident("newpage", char_, const_newpage);
        self.ident("blank", char_, const_blank);

        self.proc_ident("stop", &[], void, genie_stop);
    }
}

// ============================================================================
// INTRINSIC IMPLEMENTATIONS
// ============================================================================

fn pop_int(g: &mut Genie<'_>) -> Eval<i32> {
    match g.pop_operand() {
        Value::Int(i) => Ok(i),
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        other => Err(g.raise(format!("an integral operand was needed, not {other:?}"))),
    }
}

fn pop_long(g: &mut Genie<'_>) -> Eval<i64> {
    match g.pop_operand() {
        Value::LongInt(i) => Ok(i),
        Value::Int(i) => Ok(i as i64),
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        _ => Err(g.raise("a long integral operand was needed")),
    }
}

/// Numeric operand as a REAL; the mixed overloads funnel through here.
fn pop_num(g: &mut Genie<'_>) -> Eval<f64> {
    match g.pop_operand() {
        Value::Real(r) => Ok(r),
        Value::Int(i) => Ok(i as f64),
        Value::LongInt(i) => Ok(i as f64),
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        _ => Err(g.raise("a numeric operand was needed")),
    }
}

fn pop_bool(g: &mut Genie<'_>) -> Eval<bool> {
    match g.pop_operand() {
        Value::Bool(b) => Ok(b),
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        _ => Err(g.raise("a boolean operand was needed")),
    }
}

fn pop_char(g: &mut Genie<'_>) -> Eval<char> {
    match g.pop_operand() {
        Value::Char(c) => Ok(c),
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        _ => Err(g.raise("a character operand was needed")),
    }
}

fn pop_bits(g: &mut Genie<'_>) -> Eval<u32> {
    match g.pop_operand() {
        Value::Bits(b) => Ok(b),
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        _ => Err(g.raise("a bits operand was needed")),
    }
}

/// A string-ish operand flattened to text.
fn pop_text(g: &mut Genie<'_>) -> Eval<String> {
    match g.pop_operand() {
        Value::Char(c) => Ok(c.to_string()),
        Value::Row(handle) => {
            let mut text = String::new();
            for element in g.elements_of(handle) {
                match element {
                    Value::Char(c) => text.push(c),
                    _ => return Err(g.raise("a character row was needed")),
                }
            }
            Ok(text)
        }
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        _ => Err(g.raise("a string operand was needed")),
    }
}

fn pop_compl(g: &mut Genie<'_>) -> Eval<(f64, f64)> {
    match g.pop_operand() {
        Value::Struct(fields) => match (fields.first(), fields.get(1)) {
            (Some(Value::Real(re)), Some(Value::Real(im))) => Ok((*re, *im)),
            _ => Err(g.raise("a complex operand was needed")),
        },
        Value::Uninit => Err(g.raise("attempt to use an uninitialised value")),
        _ => Err(g.raise("a complex operand was needed")),
    }
}

fn push_compl(g: &mut Genie<'_>, re: f64, im: f64) -> Eval<()> {
    check_finite(g, re)?;
    check_finite(g, im)?;
    g.push(Value::Struct(Box::new([Value::Real(re), Value::Real(im)])));
    Ok(())
}

fn check_finite(g: &Genie<'_>, value: f64) -> Eval<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(g.raise("real arithmetic overflow"))
    }
}

fn identity(_: &mut Genie<'_>) -> Eval<()> {
    Ok(())
}

// ---- INT -------------------------------------------------------------------

macro_rules! int_checked {
    ($name:ident, $method:ident) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            let b = pop_int(g)?;
            let a = pop_int(g)?;
            let r = a
                .$method(b)
                .ok_or_else(|| g.raise("integral arithmetic overflow"))?;
            g.push(Value::Int(r));
            Ok(())
        }
    };
}

int_checked!(int_add, checked_add);
int_checked!(int_sub, checked_sub);
int_checked!(int_mul, checked_mul);

fn int_over(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_int(g)?;
    let a = pop_int(g)?;
    if b == 0 {
        return Err(g.raise("division by zero"));
    }
    g.push(Value::Int(a.wrapping_div(b)));
    Ok(())
}

fn int_mod(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_int(g)?;
    let a = pop_int(g)?;
    if b == 0 {
        return Err(g.raise("division by zero"));
    }
    let remainder = a.wrapping_rem(b);
    let r = if remainder < 0 {
        remainder + b.abs()
    } else {
        remainder
    };
    g.push(Value::Int(r));
    Ok(())
}

fn int_pow(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_int(g)?;
    let a = pop_int(g)?;
    if b < 0 {
        return Err(g.raise("negative exponent in integral power"));
    }
    let r = a
        .checked_pow(b as u32)
        .ok_or_else(|| g.raise("integral arithmetic overflow"))?;
    g.push(Value::Int(r));
    Ok(())
}

fn int_neg(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_int(g)?;
    let r = a
        .checked_neg()
        .ok_or_else(|| g.raise("integral arithmetic overflow"))?;
    g.push(Value::Int(r));
    Ok(())
}

fn int_abs(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_int(g)?;
    let r = a
        .checked_abs()
        .ok_or_else(|| g.raise("integral arithmetic overflow"))?;
    g.push(Value::Int(r));
    Ok(())
}

fn int_sign(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_int(g)?;
    g.push(Value::Int(a.signum()));
    Ok(())
}

fn int_odd(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_int(g)?;
    g.push(Value::Bool(a.rem_euclid(2) == 1));
    Ok(())
}

fn int_leng(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_int(g)?;
    g.push(Value::LongInt(a as i64));
    Ok(())
}

fn int_repr(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_int(g)?;
    let c = u32::try_from(a)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| g.raise("no character with that code"))?;
    g.push(Value::Char(c));
    Ok(())
}

fn int_bin(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_int(g)?;
    if a < 0 {
        return Err(g.raise("BIN of a negative value"));
    }
    g.push(Value::Bits(a as u32));
    Ok(())
}

// ---- LONG INT --------------------------------------------------------------

macro_rules! long_delegated {
    ($name:ident, $delegate:path) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            let b = pop_long(g)?;
            let a = pop_long(g)?;
            let r = $delegate(a, b)
                .ok_or_else(|| g.raise("long integral arithmetic overflow"))?;
            g.push(Value::LongInt(r));
            Ok(())
        }
    };
}

long_delegated!(long_add, super::mp::long_add);
long_delegated!(long_sub, super::mp::long_sub);
long_delegated!(long_mul, super::mp::long_mul);
long_delegated!(long_over, super::mp::long_over);
long_delegated!(long_mod, super::mp::long_mod);

fn long_neg(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_long(g)?;
    let r = a
        .checked_neg()
        .ok_or_else(|| g.raise("long integral arithmetic overflow"))?;
    g.push(Value::LongInt(r));
    Ok(())
}

fn long_abs(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_long(g)?;
    let r = a
        .checked_abs()
        .ok_or_else(|| g.raise("long integral arithmetic overflow"))?;
    g.push(Value::LongInt(r));
    Ok(())
}

fn long_shorten(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_long(g)?;
    let r = i32::try_from(a).map_err(|_| g.raise("SHORTEN loses the value"))?;
    g.push(Value::Int(r));
    Ok(())
}

// ---- REAL ------------------------------------------------------------------

macro_rules! real_op {
    ($name:ident, $op:tt) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            let b = pop_num(g)?;
            let a = pop_num(g)?;
            let r = check_finite(g, a $op b)?;
            g.push(Value::Real(r));
            Ok(())
        }
    };
}

real_op!(real_add, +);
real_op!(real_sub, -);
real_op!(real_mul, *);

fn real_div(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_num(g)?;
    let a = pop_num(g)?;
    if b == 0.0 {
        return Err(g.raise("division by zero"));
    }
    let r = check_finite(g, a / b)?;
    g.push(Value::Real(r));
    Ok(())
}

fn real_pow_int(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_int(g)?;
    let a = pop_num(g)?;
    let r = check_finite(g, a.powi(b))?;
    g.push(Value::Real(r));
    Ok(())
}

fn real_neg(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_num(g)?;
    g.push(Value::Real(-a));
    Ok(())
}

fn real_abs(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_num(g)?;
    g.push(Value::Real(a.abs()));
    Ok(())
}

fn real_sign(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_num(g)?;
    g.push(Value::Int(if a > 0.0 {
        1
    } else if a < 0.0 {
        -1
    } else {
        0
    }));
    Ok(())
}

fn real_entier(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_num(g)?;
    let floored = a.floor();
    if floored < i32::MIN as f64 || floored > i32::MAX as f64 {
        return Err(g.raise("ENTIER overflows the integral range"));
    }
    g.push(Value::Int(floored as i32));
    Ok(())
}

fn real_round(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_num(g)?;
    let rounded = a.round();
    if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
        return Err(g.raise("ROUND overflows the integral range"));
    }
    g.push(Value::Int(rounded as i32));
    Ok(())
}

// ---- COMPARISONS -----------------------------------------------------------

macro_rules! num_cmp {
    ($name:ident, $op:tt) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            let b = pop_num(g)?;
            let a = pop_num(g)?;
            g.push(Value::Bool(a $op b));
            Ok(())
        }
    };
}

num_cmp!(num_eq, ==);
num_cmp!(num_ne, !=);
num_cmp!(num_lt, <);
num_cmp!(num_le, <=);
num_cmp!(num_gt, >);
num_cmp!(num_ge, >=);

macro_rules! char_cmp {
    ($name:ident, $op:tt) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            let b = pop_char(g)?;
            let a = pop_char(g)?;
            g.push(Value::Bool(a $op b));
            Ok(())
        }
    };
}

char_cmp!(char_eq, ==);
char_cmp!(char_ne, !=);
char_cmp!(char_lt, <);
char_cmp!(char_le, <=);
char_cmp!(char_gt, >);
char_cmp!(char_ge, >=);

fn char_abs(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_char(g)?;
    g.push(Value::Int(a as i32));
    Ok(())
}

// ---- BOOL ------------------------------------------------------------------

fn bool_and(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bool(g)?;
    let a = pop_bool(g)?;
    g.push(Value::Bool(a && b));
    Ok(())
}

fn bool_or(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bool(g)?;
    let a = pop_bool(g)?;
    g.push(Value::Bool(a || b));
    Ok(())
}

fn bool_eq(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bool(g)?;
    let a = pop_bool(g)?;
    g.push(Value::Bool(a == b));
    Ok(())
}

fn bool_ne(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bool(g)?;
    let a = pop_bool(g)?;
    g.push(Value::Bool(a != b));
    Ok(())
}

fn bool_not(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_bool(g)?;
    g.push(Value::Bool(!a));
    Ok(())
}

fn bool_abs(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_bool(g)?;
    g.push(Value::Int(if a { 1 } else { 0 }));
    Ok(())
}

// ---- STRINGS AND ROWS ------------------------------------------------------

fn string_concat(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_text(g)?;
    let a = pop_text(g)?;
    let chars: Vec<Value> = a.chars().chain(b.chars()).map(Value::Char).collect();
    let char_mode = g.modes.char_mode;
    let row = g.alloc_row(chars, char_mode);
    g.push(Value::Row(row));
    Ok(())
}

fn string_eq(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_text(g)?;
    let a = pop_text(g)?;
    g.push(Value::Bool(a == b));
    Ok(())
}

fn string_ne(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_text(g)?;
    let a = pop_text(g)?;
    g.push(Value::Bool(a != b));
    Ok(())
}

fn row_bound(g: &mut Genie<'_>, dim: i32, upper: bool) -> Eval<()> {
    let handle = match g.pop_operand() {
        Value::Row(handle) => handle,
        Value::Uninit => return Err(g.raise("attempt to use an uninitialised value")),
        _ => return Err(g.raise("a row operand was needed")),
    };
    let descriptor = g
        .heap
        .descriptor(handle)
        .ok_or_else(|| g.raise("row descriptor vanished"))?;
    let tuple = descriptor
        .tuples
        .get(dim.max(1) as usize - 1)
        .ok_or_else(|| g.raise("no such dimension"))?;
    let bound = if upper { tuple.upb } else { tuple.lwb };
    g.push(Value::Int(bound as i32));
    Ok(())
}

fn row_upb(g: &mut Genie<'_>) -> Eval<()> {
    row_bound(g, 1, true)
}

fn row_lwb(g: &mut Genie<'_>) -> Eval<()> {
    row_bound(g, 1, false)
}

fn row_upb_dyadic(g: &mut Genie<'_>) -> Eval<()> {
    // Operands arrive as (dimension, row); the row is on top.
    let row = g.pop_operand();
    let dim = pop_int(g)?;
    g.push(row);
    row_bound(g, dim, true)
}

fn row_lwb_dyadic(g: &mut Genie<'_>) -> Eval<()> {
    let row = g.pop_operand();
    let dim = pop_int(g)?;
    g.push(row);
    row_bound(g, dim, false)
}

// ---- BITS ------------------------------------------------------------------

fn bits_and(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bits(g)?;
    let a = pop_bits(g)?;
    g.push(Value::Bits(a & b));
    Ok(())
}

fn bits_or(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bits(g)?;
    let a = pop_bits(g)?;
    g.push(Value::Bits(a | b));
    Ok(())
}

fn bits_eq(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bits(g)?;
    let a = pop_bits(g)?;
    g.push(Value::Bool(a == b));
    Ok(())
}

fn bits_ne(g: &mut Genie<'_>) -> Eval<()> {
    let b = pop_bits(g)?;
    let a = pop_bits(g)?;
    g.push(Value::Bool(a != b));
    Ok(())
}

fn bits_not(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_bits(g)?;
    g.push(Value::Bits(!a));
    Ok(())
}

fn bits_abs(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_bits(g)?;
    let r = i32::try_from(a).map_err(|_| g.raise("ABS overflows the integral range"))?;
    g.push(Value::Int(r));
    Ok(())
}

fn bits_shl(g: &mut Genie<'_>) -> Eval<()> {
    let by = pop_int(g)?;
    let a = pop_bits(g)?;
    let r = if by >= 0 {
        a.checked_shl(by as u32).unwrap_or(0)
    } else {
        a.checked_shr((-by) as u32).unwrap_or(0)
    };
    g.push(Value::Bits(r));
    Ok(())
}

fn bits_shr(g: &mut Genie<'_>) -> Eval<()> {
    let by = pop_int(g)?;
    let a = pop_bits(g)?;
    let r = if by >= 0 {
        a.checked_shr(by as u32).unwrap_or(0)
    } else {
        a.checked_shl((-by) as u32).unwrap_or(0)
    };
    g.push(Value::Bits(r));
    Ok(())
}

fn bits_elem(g: &mut Genie<'_>) -> Eval<()> {
    let a = pop_bits(g)?;
    let position = pop_int(g)?;
    if !(1..=32).contains(&position) {
        return Err(g.raise("ELEM position is outside the bits width"));
    }
    // Position 1 is the most significant bit.
    g.push(Value::Bool(a >> (32 - position) & 1 == 1));
    Ok(())
}

// ---- COMPL -----------------------------------------------------------------

fn compl_add(g: &mut Genie<'_>) -> Eval<()> {
    let (bre, bim) = pop_compl(g)?;
    let (are, aim) = pop_compl(g)?;
    push_compl(g, are + bre, aim + bim)
}

fn compl_sub(g: &mut Genie<'_>) -> Eval<()> {
    let (bre, bim) = pop_compl(g)?;
    let (are, aim) = pop_compl(g)?;
    push_compl(g, are - bre, aim - bim)
}

fn compl_mul(g: &mut Genie<'_>) -> Eval<()> {
    let (bre, bim) = pop_compl(g)?;
    let (are, aim) = pop_compl(g)?;
    push_compl(g, are * bre - aim * bim, are * bim + aim * bre)
}

fn compl_div(g: &mut Genie<'_>) -> Eval<()> {
    let (bre, bim) = pop_compl(g)?;
    let (are, aim) = pop_compl(g)?;
    let denominator = bre * bre + bim * bim;
    if denominator == 0.0 {
        return Err(g.raise("division by zero"));
    }
    push_compl(
        g,
        (are * bre + aim * bim) / denominator,
        (aim * bre - are * bim) / denominator,
    )
}

fn compl_eq(g: &mut Genie<'_>) -> Eval<()> {
    let (bre, bim) = pop_compl(g)?;
    let (are, aim) = pop_compl(g)?;
    g.push(Value::Bool(are == bre && aim == bim));
    Ok(())
}

fn compl_ne(g: &mut Genie<'_>) -> Eval<()> {
    let (bre, bim) = pop_compl(g)?;
    let (are, aim) = pop_compl(g)?;
    g.push(Value::Bool(are != bre || aim != bim));
    Ok(())
}

fn compl_neg(g: &mut Genie<'_>) -> Eval<()> {
    let (re, im) = pop_compl(g)?;
    push_compl(g, -re, -im)
}

fn compl_re(g: &mut Genie<'_>) -> Eval<()> {
    let (re, _) = pop_compl(g)?;
    g.push(Value::Real(re));
    Ok(())
}

fn compl_im(g: &mut Genie<'_>) -> Eval<()> {
    let (_, im) = pop_compl(g)?;
    g.push(Value::Real(im));
    Ok(())
}

fn compl_conj(g: &mut Genie<'_>) -> Eval<()> {
    let (re, im) = pop_compl(g)?;
    push_compl(g, re, -im)
}

fn compl_abs(g: &mut Genie<'_>) -> Eval<()> {
    let (re, im) = pop_compl(g)?;
    g.push(Value::Real(re.hypot(im)));
    Ok(())
}

fn compl_arg(g: &mut Genie<'_>) -> Eval<()> {
    let (re, im) = pop_compl(g)?;
    if re == 0.0 && im == 0.0 {
        return Err(g.raise("ARG of zero"));
    }
    g.push(Value::Real(im.atan2(re)));
    Ok(())
}

// ---- SEMA ------------------------------------------------------------------

fn sema_level(g: &mut Genie<'_>) -> Eval<()> {
    let count = pop_int(g)?;
    let mode = g.modes.sema_mode;
    let handle = g.heap.alloc_plain(vec![Value::Int(count)], mode);
    g.push(Value::Sema(handle));
    Ok(())
}

fn sema_counter(g: &mut Genie<'_>) -> Eval<(crate::genie::HandleId, i32)> {
    let handle = match g.pop_operand() {
        Value::Sema(handle) => handle,
        Value::Uninit => return Err(g.raise("attempt to use an uninitialised value")),
        _ => return Err(g.raise("a semaphore was needed")),
    };
    let count = match g.heap.payload(handle).and_then(|p| p.first()) {
        Some(Value::Int(count)) => *count,
        _ => return Err(g.raise("semaphore vanished")),
    };
    Ok((handle, count))
}

fn sema_value(g: &mut Genie<'_>) -> Eval<()> {
    let (_, count) = sema_counter(g)?;
    g.push(Value::Int(count));
    Ok(())
}

fn sema_up(g: &mut Genie<'_>) -> Eval<()> {
    let (handle, count) = sema_counter(g)?;
    if let Some(slot) = g.heap.payload_mut(handle).and_then(|p| p.first_mut()) {
        *slot = Value::Int(count + 1);
    }
    g.push(Value::Empty);
    Ok(())
}

fn sema_down(g: &mut Genie<'_>) -> Eval<()> {
    let (handle, count) = sema_counter(g)?;
    if count <= 0 {
        // Arms of a parallel clause run collaterally; a DOWN that would
        // block can never be released by a sibling.
        return Err(g.raise("DOWN on a zero semaphore deadlocks"));
    }
    if let Some(slot) = g.heap.payload_mut(handle).and_then(|p| p.first_mut()) {
        *slot = Value::Int(count - 1);
    }
    g.push(Value::Empty);
    Ok(())
}

// ---- BECOMES OPERATORS -----------------------------------------------------

/// Shared shape of the updating operators: pop the source and the name,
/// combine with the name's current content, store, deliver the name.
fn update_name(
    g: &mut Genie<'_>,
    combine: impl FnOnce(&mut Genie<'_>, Value, Value) -> Eval<Value>,
) -> Eval<()> {
    let source = g.pop_operand();
    let name = match g.pop_operand() {
        Value::Ref(reference) => reference,
        Value::Uninit => return Err(g.raise("attempt to use an uninitialised value")),
        _ => return Err(g.raise("a name was needed")),
    };
    let current = g
        .read_name(&name)
        .ok_or_else(|| g.raise("attempt to use an uninitialised value"))?;
    let updated = combine(g, current, source)?;
    g.write_name(&name, updated)?;
    g.push(Value::Ref(name));
    Ok(())
}

macro_rules! becomes_int {
    ($name:ident, $combine:expr) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            update_name(g, |g, current, source| {
                let (a, b) = match (current, source) {
                    (Value::Int(a), Value::Int(b)) => (a, b),
                    _ => return Err(g.raise("integral operands were needed")),
                };
                let combine: fn(i32, i32) -> Option<i32> = $combine;
                let r = combine(a, b)
                    .ok_or_else(|| g.raise("integral arithmetic overflow"))?;
                Ok(Value::Int(r))
            })
        }
    };
}

becomes_int!(plusab_int, |a, b| a.checked_add(b));
becomes_int!(minusab_int, |a, b| a.checked_sub(b));
becomes_int!(timesab_int, |a, b| a.checked_mul(b));
becomes_int!(overab_int, |a, b| if b == 0 {
    None
} else {
    a.checked_div(b)
});
becomes_int!(modab_int, |a, b| if b == 0 {
    None
} else {
    Some(a.rem_euclid(b))
});

macro_rules! becomes_real {
    ($name:ident, $op:tt) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            update_name(g, |g, current, source| {
                let a = match current {
                    Value::Real(a) => a,
                    _ => return Err(g.raise("a real name was needed")),
                };
                let b = match source {
                    Value::Real(b) => b,
                    Value::Int(b) => b as f64,
                    _ => return Err(g.raise("a numeric operand was needed")),
                };
                let r = check_finite(g, a $op b)?;
                Ok(Value::Real(r))
            })
        }
    };
}

becomes_real!(plusab_real, +);
becomes_real!(minusab_real, -);
becomes_real!(timesab_real, *);

fn divab_real(g: &mut Genie<'_>) -> Eval<()> {
    update_name(g, |g, current, source| {
        let a = match current {
            Value::Real(a) => a,
            _ => return Err(g.raise("a real name was needed")),
        };
        let b = match source {
            Value::Real(b) => b,
            Value::Int(b) => b as f64,
            _ => return Err(g.raise("a numeric operand was needed")),
        };
        if b == 0.0 {
            return Err(g.raise("division by zero"));
        }
        Ok(Value::Real(check_finite(g, a / b)?))
    })
}

fn plusab_long(g: &mut Genie<'_>) -> Eval<()> {
    update_name(g, |g, current, source| {
        let (a, b) = match (current, source) {
            (Value::LongInt(a), Value::LongInt(b)) => (a, b),
            _ => return Err(g.raise("long integral operands were needed")),
        };
        let r = super::mp::long_add(a, b)
            .ok_or_else(|| g.raise("long integral arithmetic overflow"))?;
        Ok(Value::LongInt(r))
    })
}

fn plusab_string(g: &mut Genie<'_>) -> Eval<()> {
    update_name(g, |g, current, source| {
        let mut text = text_of(g, current)?;
        text.push_str(&text_of(g, source)?);
        let chars: Vec<Value> = text.chars().map(Value::Char).collect();
        let char_mode = g.modes.char_mode;
        let row = g.alloc_row(chars, char_mode);
        Ok(Value::Row(row))
    })
}

fn text_of(g: &Genie<'_>, value: Value) -> Eval<String> {
    match value {
        Value::Char(c) => Ok(c.to_string()),
        Value::Row(handle) => {
            let mut text = String::new();
            for element in g.elements_of(handle) {
                match element {
                    Value::Char(c) => text.push(c),
                    _ => return Err(g.raise("a character row was needed")),
                }
            }
            Ok(text)
        }
        _ => Err(g.raise("a string value was needed")),
    }
}

// ---- MATHEMATICAL ROUTINES -------------------------------------------------

macro_rules! math_fn {
    ($name:ident, $method:ident) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            let a = pop_num(g)?;
            let r = a.$method();
            if r.is_nan() {
                return Err(g.raise(concat!(
                    stringify!($method),
                    " is undefined for that argument"
                )));
            }
            g.push(Value::Real(check_finite(g, r)?));
            Ok(())
        }
    };
}

math_fn!(math_sqrt, sqrt);
math_fn!(math_exp, exp);
math_fn!(math_ln, ln);
math_fn!(math_log, log10);
math_fn!(math_sin, sin);
math_fn!(math_cos, cos);
math_fn!(math_tan, tan);
math_fn!(math_arcsin, asin);
math_fn!(math_arccos, acos);
math_fn!(math_arctan, atan);

// ---- TRANSPUT AND ENQUIRIES ------------------------------------------------

/// `print`: one row of united values, each rendered in its default format.
fn genie_print(g: &mut Genie<'_>) -> Eval<()> {
    let handle = match g.pop_operand() {
        Value::Row(handle) => handle,
        Value::Uninit => return Err(g.raise("attempt to use an uninitialised value")),
        _ => return Err(g.raise("print needs a row of printable values")),
    };
    for element in g.elements_of(handle) {
        let text = match element {
            Value::United { tag, value } => match *value {
                // Character rows print as their text, not as a scalar.
                Value::Row(row) => text_of(g, Value::Row(row))?,
                Value::Uninit => {
                    return Err(g.raise("attempt to print an uninitialised value"));
                }
                other => transput::value_to_string(g.modes, tag, &other),
            },
            // The checker unites every display argument into the transput
            // union before it reaches this row.
            _ => return Err(g.raise("print was handed a value outside the transput union")),
        };
        g.out.push_str(&text);
    }
    g.push(Value::Empty);
    Ok(())
}

fn genie_stop(_g: &mut Genie<'_>) -> Eval<()> {
    Err(Interrupt::Stop { code: 0 })
}

macro_rules! enquiry {
    ($name:ident, $value:expr) => {
        fn $name(g: &mut Genie<'_>) -> Eval<()> {
            g.push($value);
            Ok(())
        }
    };
}

enquiry!(const_pi, Value::Real(std::f64::consts::PI));
enquiry!(const_max_int, Value::Int(i32::MAX));
enquiry!(const_long_max_int, Value::LongInt(i64::MAX));
enquiry!(const_max_real, Value::Real(f64::MAX));
enquiry!(const_small_real, Value::Real(f64::EPSILON));
enquiry!(const_int_width, Value::Int(INT_WIDTH as i32));
enquiry!(const_real_width, Value::Int(REAL_WIDTH as i32));
enquiry!(const_max_abs_char, Value::Int(255));
enquiry!(const_newline, Value::Char('\n'));
enquiry!(const_newpage, Value::Char('\u{c}'));
enquiry!(const_blank, Value::Char(' '));

/// The LONG widths are enquiries into the multi-precision layer.
fn const_long_int_width(g: &mut Genie<'_>) -> Eval<()> {
    let digits = super::mp::digits(g.modes, g.modes.long_int_mode);
    g.push(Value::Int(digits as i32 + 1));
    Ok(())
}

fn const_bits_width(g: &mut Genie<'_>) -> Eval<()> {
    let digits = super::mp::digits(g.modes, g.modes.bits_mode);
    g.push(Value::Int(digits as i32));
    Ok(())
}
