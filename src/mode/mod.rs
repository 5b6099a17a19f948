//! The mode (type) system.
//!
//! All modes live in one arena indexed by [`ModeId`]; composite shapes hold
//! `ModeId` components, so recursive declarations form ordinary index cycles.
//! Equivalence collapses structurally equal modes onto a canonical
//! representative through the `equivalent` slot - every operation chases that
//! slot before inspecting a shape.
//!
//! Submodules:
//! - [`equivalence`] - structural equivalence under postulation and the
//!   fixed-point closure over the whole table
//! - [`derived`] - deflexing, slicing, name/multiple packs, well-formedness
//! - [`coerce`] - the five coercion contexts and chain generation
//! - [`balance`] - the common mode of a multi-branch clause

mod balance;
mod coerce;
mod derived;
mod equivalence;

pub use coerce::{Coercion, CoercionKind, DeflexRegime, Sort};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::base::Name;

/// Index of a mode in the mode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModeId(u32);

impl ModeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The named primitive modes of the standard environ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Real,
    Bool,
    Char,
    Bits,
    Bytes,
    Sema,
    Void,
    /// The mode of SKIP, NIL and jumps: strongly coercible to anything.
    Hip,
    /// Formal-parameter wildcard of the prelude row operators (UPB, LWB):
    /// firmly accepts any row.
    Rows,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Int => "INT",
            Primitive::Real => "REAL",
            Primitive::Bool => "BOOL",
            Primitive::Char => "CHAR",
            Primitive::Bits => "BITS",
            Primitive::Bytes => "BYTES",
            Primitive::Sema => "SEMA",
            Primitive::Void => "VOID",
            Primitive::Hip => "HIP",
            Primitive::Rows => "ROWS",
        }
    }
}

/// One field of a structured mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: Name,
    pub mode: ModeId,
}

/// The shape of a mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModeShape {
    /// A named primitive with a sizety (`LONG` count; negative for `SHORT`).
    Standard { prim: Primitive, sizety: i8 },
    /// An applied mode indicant, made transparent once its declaration is
    /// bound (via the `equivalent` slot).
    Indicant { name: Name },
    Ref(ModeId),
    /// A flexible row; the component is the underlying row.
    Flex(ModeId),
    Row { dims: u32, elem: ModeId },
    Proc { params: Vec<ModeId>, result: ModeId },
    Struct { fields: Vec<Field> },
    Union { members: Vec<ModeId> },
    /// Transient composition produced while balancing a series.
    Series { members: Vec<ModeId> },
}

/// Lazily computed companion modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Derived {
    pub slice: Option<ModeId>,
    pub deflexed: Option<ModeId>,
    /// Pack of REF-to-field modes of a REF-to-STRUCT.
    pub name: Option<ModeId>,
    /// STRUCT-of-ROW companion of a ROW-of-STRUCT.
    pub multiple: Option<ModeId>,
    pub trim: Option<ModeId>,
    pub rowed: Option<ModeId>,
}

/// A mode table entry.
#[derive(Debug, Clone)]
pub struct Mode {
    pub shape: ModeShape,
    /// Canonical representative; `None` when this mode is itself canonical.
    pub equivalent: Option<ModeId>,
    pub well_formed: bool,
    pub has_ref: Option<bool>,
    pub has_flex: Option<bool>,
    pub has_rows: Option<bool>,
    /// Resident of the standard environ; preferred as the elder when
    /// equivalence collapses two modes.
    pub in_standard: bool,
    pub derived: Derived,
}

impl Mode {
    fn new(shape: ModeShape) -> Self {
        Self {
            shape,
            equivalent: None,
            well_formed: true,
            has_ref: None,
            has_flex: None,
            has_rows: None,
            in_standard: false,
            derived: Derived::default(),
        }
    }
}

/// The process-wide mode arena.
#[derive(Debug, Clone)]
pub struct ModeTable {
    modes: Vec<Mode>,
    /// Interning for standard primitives: one entry per `(primitive, sizety)`
    /// regardless of where it is written.
    standards: FxHashMap<(Primitive, i8), ModeId>,
    /// Structural interning for composites whose components are canonical.
    composites: FxHashMap<ModeShape, ModeId>,
    pub void_mode: ModeId,
    pub hip_mode: ModeId,
    pub int_mode: ModeId,
    pub real_mode: ModeId,
    pub bool_mode: ModeId,
    pub char_mode: ModeId,
    pub bits_mode: ModeId,
    pub bytes_mode: ModeId,
    pub sema_mode: ModeId,
    pub long_int_mode: ModeId,
    pub long_real_mode: ModeId,
    pub long_bits_mode: ModeId,
    /// `STRUCT (REAL re, REAL im)`.
    pub complex_mode: ModeId,
    pub long_complex_mode: ModeId,
    /// `[] CHAR`.
    pub row_of_char_mode: ModeId,
    /// `[] BOOL`.
    pub row_of_bool_mode: ModeId,
    /// `FLEX [] CHAR`.
    pub string_mode: ModeId,
    /// The row-accepting wildcard of UPB and LWB.
    pub rows_mode: ModeId,
}

impl ModeTable {
    pub fn new() -> Self {
        let mut table = Self {
            modes: Vec::new(),
            standards: FxHashMap::default(),
            composites: FxHashMap::default(),
            void_mode: ModeId(0),
            hip_mode: ModeId(0),
            int_mode: ModeId(0),
            real_mode: ModeId(0),
            bool_mode: ModeId(0),
            char_mode: ModeId(0),
            bits_mode: ModeId(0),
            bytes_mode: ModeId(0),
            sema_mode: ModeId(0),
            long_int_mode: ModeId(0),
            long_real_mode: ModeId(0),
            long_bits_mode: ModeId(0),
            complex_mode: ModeId(0),
            long_complex_mode: ModeId(0),
            row_of_char_mode: ModeId(0),
            row_of_bool_mode: ModeId(0),
            string_mode: ModeId(0),
            rows_mode: ModeId(0),
        };
        table.void_mode = table.standard(Primitive::Void, 0);
        table.hip_mode = table.standard(Primitive::Hip, 0);
        table.int_mode = table.standard(Primitive::Int, 0);
        table.real_mode = table.standard(Primitive::Real, 0);
        table.bool_mode = table.standard(Primitive::Bool, 0);
        table.char_mode = table.standard(Primitive::Char, 0);
        table.bits_mode = table.standard(Primitive::Bits, 0);
        table.bytes_mode = table.standard(Primitive::Bytes, 0);
        table.sema_mode = table.standard(Primitive::Sema, 0);
        table.long_int_mode = table.standard(Primitive::Int, 1);
        table.long_real_mode = table.standard(Primitive::Real, 1);
        table.long_bits_mode = table.standard(Primitive::Bits, 1);
        table.complex_mode = table.complex(0);
        table.long_complex_mode = table.complex(1);
        table.row_of_char_mode = table.row(1, table.char_mode);
        table.row_of_bool_mode = table.row(1, table.bool_mode);
        table.string_mode = table.flex(table.row_of_char_mode);
        table.rows_mode = table.standard(Primitive::Rows, 0);
        for id in 0..table.modes.len() {
            table.modes[id].in_standard = true;
        }
        table
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ModeId> + use<> {
        (0..self.modes.len() as u32).map(ModeId)
    }

    pub fn get(&self, id: ModeId) -> &Mode {
        &self.modes[id.index()]
    }

    pub fn get_mut(&mut self, id: ModeId) -> &mut Mode {
        &mut self.modes[id.index()]
    }

    /// The shape of the canonical representative of `id`.
    pub fn shape(&self, id: ModeId) -> &ModeShape {
        &self.modes[self.chase(id).index()].shape
    }

    /// Follow `equivalent` links to the canonical representative.
    pub fn chase(&self, id: ModeId) -> ModeId {
        let mut current = id;
        while let Some(next) = self.modes[current.index()].equivalent {
            current = next;
        }
        current
    }

    fn alloc(&mut self, shape: ModeShape) -> ModeId {
        let id = ModeId(self.modes.len() as u32);
        self.modes.push(Mode::new(shape));
        id
    }

    // ========================================================================
    // CONSTRUCTION
    // ========================================================================

    /// Intern a standard primitive; `LONG^k T` reuses one entry everywhere.
    pub fn standard(&mut self, prim: Primitive, sizety: i8) -> ModeId {
        if let Some(&id) = self.standards.get(&(prim, sizety)) {
            return id;
        }
        let id = self.alloc(ModeShape::Standard { prim, sizety });
        self.standards.insert((prim, sizety), id);
        id
    }

    fn intern(&mut self, shape: ModeShape) -> ModeId {
        if let Some(&id) = self.composites.get(&shape) {
            return id;
        }
        let id = self.alloc(shape.clone());
        self.composites.insert(shape, id);
        id
    }

    pub fn reference_to(&mut self, inner: ModeId) -> ModeId {
        let inner = self.chase(inner);
        self.intern(ModeShape::Ref(inner))
    }

    pub fn flex(&mut self, row: ModeId) -> ModeId {
        let row = self.chase(row);
        self.intern(ModeShape::Flex(row))
    }

    pub fn row(&mut self, dims: u32, elem: ModeId) -> ModeId {
        let elem = self.chase(elem);
        self.intern(ModeShape::Row { dims, elem })
    }

    pub fn procedure(&mut self, params: Vec<ModeId>, result: ModeId) -> ModeId {
        let params = params.into_iter().map(|p| self.chase(p)).collect();
        let result = self.chase(result);
        self.intern(ModeShape::Proc { params, result })
    }

    pub fn structure(&mut self, fields: Vec<Field>) -> ModeId {
        let fields = fields
            .into_iter()
            .map(|f| Field {
                name: f.name,
                mode: self.chase(f.mode),
            })
            .collect();
        self.intern(ModeShape::Struct { fields })
    }

    pub fn union_of(&mut self, members: Vec<ModeId>) -> ModeId {
        let members = members.into_iter().map(|m| self.chase(m)).collect();
        self.alloc(ModeShape::Union { members })
    }

    pub fn series(&mut self, members: Vec<ModeId>) -> ModeId {
        self.alloc(ModeShape::Series { members })
    }

    /// An applied indicant, resolved later by the tag binder.
    pub fn indicant(&mut self, name: Name) -> ModeId {
        self.alloc(ModeShape::Indicant { name })
    }

    fn complex(&mut self, sizety: i8) -> ModeId {
        let re = self.standard(Primitive::Real, sizety);
        let fields = vec![
            Field {
                name: "re".into(),
                mode: re,
            },
            Field {
                name: "im".into(),
                mode: re,
            },
        ];
        self.structure(fields)
    }

    // ========================================================================
    // SHAPE QUERIES (on canonical representatives)
    // ========================================================================

    pub fn is_standard(&self, id: ModeId, prim: Primitive) -> bool {
        matches!(self.shape(id), ModeShape::Standard { prim: p, .. } if *p == prim)
    }

    pub fn is_void(&self, id: ModeId) -> bool {
        self.is_standard(id, Primitive::Void)
    }

    pub fn is_hip(&self, id: ModeId) -> bool {
        self.is_standard(id, Primitive::Hip)
    }

    pub fn is_ref(&self, id: ModeId) -> bool {
        matches!(self.shape(id), ModeShape::Ref(_))
    }

    pub fn is_row(&self, id: ModeId) -> bool {
        matches!(self.shape(id), ModeShape::Row { .. } | ModeShape::Flex(_))
    }

    pub fn is_flex(&self, id: ModeId) -> bool {
        matches!(self.shape(id), ModeShape::Flex(_))
    }

    pub fn is_struct(&self, id: ModeId) -> bool {
        matches!(self.shape(id), ModeShape::Struct { .. })
    }

    pub fn is_union(&self, id: ModeId) -> bool {
        matches!(self.shape(id), ModeShape::Union { .. })
    }

    pub fn is_proc(&self, id: ModeId) -> bool {
        matches!(self.shape(id), ModeShape::Proc { .. })
    }

    /// `STRUCT (REAL re, REAL im)` of any sizety.
    pub fn is_complex(&self, id: ModeId) -> Option<i8> {
        let fields = match self.shape(id) {
            ModeShape::Struct { fields } => fields,
            _ => return None,
        };
        let (re, im) = match fields.as_slice() {
            [re, im] if re.name == "re" && im.name == "im" => (re, im),
            _ => return None,
        };
        if self.chase(re.mode) != self.chase(im.mode) {
            return None;
        }
        match self.shape(re.mode) {
            ModeShape::Standard {
                prim: Primitive::Real,
                sizety,
            } => Some(*sizety),
            _ => None,
        }
    }

    /// The target of a REF, if `id` is one.
    pub fn ref_target(&self, id: ModeId) -> Option<ModeId> {
        match self.shape(id) {
            ModeShape::Ref(inner) => Some(self.chase(*inner)),
            _ => None,
        }
    }

    /// The result of a parameterless PROC, if `id` is one.
    pub fn proc_result(&self, id: ModeId) -> Option<ModeId> {
        match self.shape(id) {
            ModeShape::Proc { params, result } if params.is_empty() => Some(self.chase(*result)),
            _ => None,
        }
    }

    /// Underlying row of a row or flex-row mode.
    pub fn row_of(&self, id: ModeId) -> Option<(u32, ModeId)> {
        match self.shape(id) {
            ModeShape::Row { dims, elem } => Some((*dims, self.chase(*elem))),
            ModeShape::Flex(row) => self.row_of(*row),
            _ => None,
        }
    }

    /// Fields of a structured mode.
    pub fn fields_of(&self, id: ModeId) -> Option<&[Field]> {
        match self.shape(id) {
            ModeShape::Struct { fields } => Some(fields),
            _ => None,
        }
    }

    /// Field mode by selector name.
    pub fn field_mode(&self, id: ModeId, name: &str) -> Option<(usize, ModeId)> {
        let fields = self.fields_of(id)?;
        fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (i, self.chase(f.mode)))
    }

    /// Members of a united mode.
    pub fn members_of(&self, id: ModeId) -> Option<&[ModeId]> {
        match self.shape(id) {
            ModeShape::Union { members } => Some(members),
            _ => None,
        }
    }

    /// Render a mode the way a declarer is written, for diagnostics.
    pub fn describe(&self, id: ModeId) -> String {
        self.describe_depth(id, 0)
    }

    fn describe_depth(&self, id: ModeId, depth: usize) -> String {
        if depth > 8 {
            return "...".to_string();
        }
        let id = self.chase(id);
        if id == self.string_mode {
            return "STRING".to_string();
        }
        if let Some(sizety) = self.is_complex(id) {
            let long = "LONG ".repeat(sizety.max(0) as usize);
            return format!("{long}COMPL");
        }
        match &self.modes[id.index()].shape {
            ModeShape::Standard { prim, sizety } => {
                let stropped = if *sizety >= 0 {
                    "LONG ".repeat(*sizety as usize)
                } else {
                    "SHORT ".repeat((-sizety) as usize)
                };
                format!("{stropped}{}", prim.name())
            }
            ModeShape::Indicant { name } => name.to_string(),
            ModeShape::Ref(inner) => format!("REF {}", self.describe_depth(*inner, depth + 1)),
            ModeShape::Flex(row) => format!("FLEX {}", self.describe_depth(*row, depth + 1)),
            ModeShape::Row { dims, elem } => {
                let commas = ",".repeat((*dims - 1) as usize);
                format!("[{commas}] {}", self.describe_depth(*elem, depth + 1))
            }
            ModeShape::Proc { params, result } => {
                let params: Vec<String> = params
                    .iter()
                    .map(|p| self.describe_depth(*p, depth + 1))
                    .collect();
                let result = self.describe_depth(*result, depth + 1);
                if params.is_empty() {
                    format!("PROC {result}")
                } else {
                    format!("PROC ({}) {result}", params.join(", "))
                }
            }
            ModeShape::Struct { fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{} {}", self.describe_depth(f.mode, depth + 1), f.name))
                    .collect();
                format!("STRUCT ({})", fields.join(", "))
            }
            ModeShape::Union { members } => {
                let members: Vec<String> = members
                    .iter()
                    .map(|m| self.describe_depth(*m, depth + 1))
                    .collect();
                format!("UNION ({})", members.join(", "))
            }
            ModeShape::Series { members } => {
                let members: Vec<String> = members
                    .iter()
                    .map(|m| self.describe_depth(*m, depth + 1))
                    .collect();
                format!("SERIES ({})", members.join(", "))
            }
        }
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect the distinct canonical members reachable by flattening nested
/// unions, preserving first-seen order.
pub(crate) fn flatten_union(table: &ModeTable, members: &[ModeId]) -> Vec<ModeId> {
    let mut out: IndexMap<ModeId, ()> = IndexMap::new();
    let mut stack: Vec<ModeId> = members.iter().rev().map(|m| table.chase(*m)).collect();
    while let Some(m) = stack.pop() {
        match table.shape(m) {
            ModeShape::Union { members } => {
                stack.extend(members.iter().rev().map(|m| table.chase(*m)));
            }
            _ => {
                out.entry(m).or_insert(());
            }
        }
    }
    out.into_keys().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_modes_are_interned_once() {
        let mut table = ModeTable::new();
        let a = table.standard(Primitive::Int, 1);
        let b = table.standard(Primitive::Int, 1);
        assert_eq!(a, b);
        assert_eq!(a, table.long_int_mode);
    }

    #[test]
    fn string_is_flex_row_of_char() {
        let table = ModeTable::new();
        assert!(table.is_flex(table.string_mode));
        let (dims, elem) = table.row_of(table.string_mode).unwrap();
        assert_eq!(dims, 1);
        assert_eq!(elem, table.char_mode);
    }

    #[test]
    fn complex_is_struct_of_two_reals() {
        let table = ModeTable::new();
        assert_eq!(table.is_complex(table.complex_mode), Some(0));
        assert_eq!(table.is_complex(table.long_complex_mode), Some(1));
        assert_eq!(table.is_complex(table.int_mode), None);
    }

    #[test]
    fn describe_renders_declarer_text() {
        let mut table = ModeTable::new();
        let ref_int = table.reference_to(table.int_mode);
        assert_eq!(table.describe(ref_int), "REF INT");
        let row = table.row(2, table.real_mode);
        assert_eq!(table.describe(row), "[,] REAL");
        assert_eq!(table.describe(table.string_mode), "STRING");
    }
}
