//! Opcode definitions and their static metadata.
//!
//! Instructions are 32-bit words with a 7-bit opcode in the top bits; see
//! [`crate::instruction`] for operand packing. Each opcode carries a static
//! descriptor naming its operand access modes and control-flow properties —
//! the disassembler and compiler sanity checks read it. The table is indexed
//! by opcode value; `meta()` relies on that ordering and a test enforces it.

use num_derive::FromPrimitive;

/// Operand access mode recorded in [`OpCodeMeta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// Operand unused.
    None,
    /// Register is read.
    Read,
    /// Register is written.
    Write,
    /// Register is read and written.
    RW,
}

/// The instruction set.
///
/// Comparison opcodes are *test* instructions: they write no register and
/// instead skip the following `Jmp` when the tested condition does not
/// warrant the branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum OpCode {
    // Constant loads
    /// R(A..=A+B) = nil
    LoadNil = 0,
    /// R(A) = bool; optionally skips the next instruction
    LoadBool,
    /// R(A) = 17-bit signed immediate
    LoadImm,
    /// R(A) = integer constant \[kB\]
    LoadI,
    /// R(A) = float constant \[kB\]
    LoadF,
    /// R(A) = string constant \[kB\]
    LoadS,

    // Moves and globals
    /// R(A) = R(B)
    Move,
    /// R(A) = globals\[KS(kB)\]
    GetGlobal,
    /// globals\[KS(kB)\] = R(A)
    SetGlobal,
    /// globals\[KS(k25)\] += 1
    IncGlobal,
    /// globals\[KS(k25)\] -= 1
    DecGlobal,

    // Upvalues
    /// R(A) = upvalue B
    GetUpval,
    /// upvalue B = R(A)
    SetUpval,
    /// upvalue A += 1
    IncUpvalue,
    /// upvalue A -= 1
    DecUpvalue,

    // Tables
    /// R(A) = new table with array/hash capacity hints B and C
    NewTable,
    /// R(A) = R(B)\[R(C)\]
    GetField,
    /// R(A) = R(B)\[imm9\]
    GetFieldI,
    /// R(A) = R(B)\[KS(kC)\]
    GetFieldS,
    /// R(A)\[R(B)\] = R(C)
    SetField,
    /// R(A)\[imm9\] = R(B)
    SetFieldI,
    /// R(A)\[KS(kC)\] = R(B)
    SetFieldS,
    /// R(A+1) = R(B); R(A) = R(B)\[R(C)\] — method-call prelude
    SelfField,
    /// Bulk-store registers R(A+2..) into R(A)'s array part from index C
    SetList,

    // Arithmetic
    /// R(A) = R(B) + R(C)
    Add,
    /// R(A) = R(B) + imm9
    AddImm,
    /// R(A) = R(B) + KI(kC)
    AddKI,
    /// R(A) = R(B) + KF(kC)
    AddKF,
    /// R(A) += R(B)
    AddLocal,
    /// R(A) = R(B) - R(C)
    Sub,
    /// R(A) = R(B) - imm9
    SubImm,
    /// R(A) = R(B) - KI(kC)
    SubKI,
    /// R(A) = R(B) - KF(kC)
    SubKF,
    /// R(A) = R(B) * R(C)
    Mul,
    /// R(A) = R(B) / R(C) — always float
    Div,
    /// R(A) = R(B) % R(C) — sign of the divisor
    Mod,
    /// R(A) = R(B) ** R(C) — always float
    Pow,
    /// R(A) = -R(B)
    Unm,
    /// R(A) += 1
    IncLocal,
    /// R(A) -= 1
    DecLocal,

    // Bitwise (integer-valued operands only)
    /// R(A) = R(B) & R(C)
    Band,
    /// R(A) = R(B) | R(C)
    Bor,
    /// R(A) = R(B) ^ R(C)
    Bxor,
    /// R(A) = ~R(B)
    Bnot,
    /// R(A) = R(B) << R(C)
    Shl,
    /// R(A) = R(B) >> R(C)
    Shr,

    // Comparisons (test instructions)
    /// Test R(B) == R(C)
    Eq,
    /// Test R(B) != R(C)
    Ne,
    /// Test R(B) < R(C)
    Lt,
    /// Test R(B) <= R(C)
    Le,
    /// Test R(B) > R(C)
    Gt,
    /// Test R(B) >= R(C)
    Ge,
    /// Test R(B) == imm17
    EqImm,
    /// Test R(B) != imm17
    NeImm,
    /// Test R(B) < imm17
    LtImm,
    /// Test R(B) <= imm17
    LeImm,
    /// Test R(B) > imm17
    GtImm,
    /// Test R(B) >= imm17
    GeImm,
    /// Test R(B) < KI(kC)
    LtKI,
    /// Test R(B) <= KI(kC)
    LeKI,
    /// Test R(B) > KI(kC)
    GtKI,
    /// Test R(B) >= KI(kC)
    GeKI,
    /// Test R(B) < KF(kC)
    LtKF,
    /// Test R(B) <= KF(kC)
    LeKF,
    /// Test R(B) > KF(kC)
    GtKF,
    /// Test R(B) >= KF(kC)
    GeKF,

    // Control flow
    /// Unconditional jump by 25-bit signed offset
    Jmp,
    /// Skip next instruction unless truthiness of R(A) matches the invert bit
    Test,
    /// R(A) = R(B) when the truthiness of R(B) matches the invert bit,
    /// otherwise skip the next instruction
    TestSet,
    /// Initialize a numeric for loop over R(A..A+3), jump to its ForLoop
    ForPrep,
    /// Advance a numeric for loop, jumping back while it continues
    ForLoop,

    // Calls
    /// Call R(A) with B args expecting C results; flag bit marks self-calls
    Call,
    /// Tail-call R(A) with B args, reusing the current frame
    TailCall,
    /// Return R(A..A+B-1)
    Return,

    // Closures
    /// R(A) = closure of proto kB; followed by one capture pseudo-instruction
    /// per upvalue
    Closure,

    // Varargs
    /// Function preamble shifting the frame above its varargs
    VarargPrep,
    /// R(A..) = varargs
    Vararg,
    /// Append all varargs into R(A)'s array part starting at index B
    VarargExpand,

    // Coercion
    /// R(A) = tostring(R(B)), honoring `__tostring`
    ToString,
    /// R(A) = tonumber(R(B))
    ToNumber,

    // Length
    /// R(A) = #R(B), honoring `__len`
    Len,
}

/// Number of opcodes.
pub const OP_COUNT: usize = OpCode::Len as usize + 1;

/// Static descriptor of an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpCodeMeta {
    /// The opcode this entry describes; must equal the entry's index.
    pub opcode: OpCode,
    /// Access mode of operand A.
    pub a: OpMode,
    /// Access mode of operand B.
    pub b: OpMode,
    /// Access mode of operand C.
    pub c: OpMode,
    /// Affects memory, globals or control flow.
    pub has_side_effects: bool,
    /// Ends a basic block.
    pub is_terminator: bool,
    /// Conditional or unconditional branch.
    pub is_branch: bool,
    /// Mnemonic for disassembly.
    pub name: &'static str,
}

const fn meta_entry(
    opcode: OpCode,
    a: OpMode,
    b: OpMode,
    c: OpMode,
    has_side_effects: bool,
    is_terminator: bool,
    is_branch: bool,
    name: &'static str,
) -> OpCodeMeta {
    OpCodeMeta {
        opcode,
        a,
        b,
        c,
        has_side_effects,
        is_terminator,
        is_branch,
        name,
    }
}

/// Metadata for every opcode, indexed by opcode value.
pub static OPCODE_META: [OpCodeMeta; OP_COUNT] = {
    use OpCode::*;
    use OpMode::{None as N, RW, Read as R, Write as W};
    [
        meta_entry(LoadNil, W, N, N, false, false, false, "LOADNIL"),
        meta_entry(LoadBool, W, N, N, false, false, false, "LOADBOOL"),
        meta_entry(LoadImm, W, N, N, false, false, false, "LOADIMM"),
        meta_entry(LoadI, W, N, N, false, false, false, "LOADI"),
        meta_entry(LoadF, W, N, N, false, false, false, "LOADF"),
        meta_entry(LoadS, W, N, N, false, false, false, "LOADS"),
        meta_entry(Move, W, R, N, false, false, false, "MOVE"),
        meta_entry(GetGlobal, W, N, N, true, false, false, "GETGLOBAL"),
        meta_entry(SetGlobal, R, N, N, true, false, false, "SETGLOBAL"),
        meta_entry(IncGlobal, N, N, N, true, false, false, "INCGLOBAL"),
        meta_entry(DecGlobal, N, N, N, true, false, false, "DECGLOBAL"),
        meta_entry(GetUpval, W, N, N, true, false, false, "GETUPVAL"),
        meta_entry(SetUpval, R, N, N, true, false, false, "SETUPVAL"),
        meta_entry(IncUpvalue, N, N, N, true, false, false, "INCUPVALUE"),
        meta_entry(DecUpvalue, N, N, N, true, false, false, "DECUPVALUE"),
        meta_entry(NewTable, W, N, N, false, false, false, "NEWTABLE"),
        meta_entry(GetField, W, R, R, false, false, false, "GETFIELD"),
        meta_entry(GetFieldI, W, R, N, false, false, false, "GETFIELDI"),
        meta_entry(GetFieldS, W, R, N, false, false, false, "GETFIELDS"),
        meta_entry(SetField, R, R, R, true, false, false, "SETFIELD"),
        meta_entry(SetFieldI, R, R, N, true, false, false, "SETFIELDI"),
        meta_entry(SetFieldS, R, R, N, true, false, false, "SETFIELDS"),
        meta_entry(SelfField, W, R, R, false, false, false, "SELF"),
        meta_entry(SetList, R, N, N, true, false, false, "SETLIST"),
        meta_entry(Add, W, R, R, false, false, false, "ADD"),
        meta_entry(AddImm, W, R, N, false, false, false, "ADDIMM"),
        meta_entry(AddKI, W, R, N, false, false, false, "ADDKI"),
        meta_entry(AddKF, W, R, N, false, false, false, "ADDKF"),
        meta_entry(AddLocal, RW, R, N, false, false, false, "ADDLOCAL"),
        meta_entry(Sub, W, R, R, false, false, false, "SUB"),
        meta_entry(SubImm, W, R, N, false, false, false, "SUBIMM"),
        meta_entry(SubKI, W, R, N, false, false, false, "SUBKI"),
        meta_entry(SubKF, W, R, N, false, false, false, "SUBKF"),
        meta_entry(Mul, W, R, R, false, false, false, "MUL"),
        meta_entry(Div, W, R, R, false, false, false, "DIV"),
        meta_entry(Mod, W, R, R, false, false, false, "MOD"),
        meta_entry(Pow, W, R, R, false, false, false, "POW"),
        meta_entry(Unm, W, R, N, false, false, false, "UNM"),
        meta_entry(IncLocal, RW, N, N, false, false, false, "INCLOCAL"),
        meta_entry(DecLocal, RW, N, N, false, false, false, "DECLOCAL"),
        meta_entry(Band, W, R, R, false, false, false, "BAND"),
        meta_entry(Bor, W, R, R, false, false, false, "BOR"),
        meta_entry(Bxor, W, R, R, false, false, false, "BXOR"),
        meta_entry(Bnot, W, R, N, false, false, false, "BNOT"),
        meta_entry(Shl, W, R, R, false, false, false, "SHL"),
        meta_entry(Shr, W, R, R, false, false, false, "SHR"),
        meta_entry(Eq, N, R, R, false, false, false, "EQ"),
        meta_entry(Ne, N, R, R, false, false, false, "NE"),
        meta_entry(Lt, N, R, R, false, false, false, "LT"),
        meta_entry(Le, N, R, R, false, false, false, "LE"),
        meta_entry(Gt, N, R, R, false, false, false, "GT"),
        meta_entry(Ge, N, R, R, false, false, false, "GE"),
        meta_entry(EqImm, N, R, N, false, false, false, "EQIMM"),
        meta_entry(NeImm, N, R, N, false, false, false, "NEIMM"),
        meta_entry(LtImm, N, R, N, false, false, false, "LTIMM"),
        meta_entry(LeImm, N, R, N, false, false, false, "LEIMM"),
        meta_entry(GtImm, N, R, N, false, false, false, "GTIMM"),
        meta_entry(GeImm, N, R, N, false, false, false, "GEIMM"),
        meta_entry(LtKI, N, R, N, false, false, false, "LTKI"),
        meta_entry(LeKI, N, R, N, false, false, false, "LEKI"),
        meta_entry(GtKI, N, R, N, false, false, false, "GTKI"),
        meta_entry(GeKI, N, R, N, false, false, false, "GEKI"),
        meta_entry(LtKF, N, R, N, false, false, false, "LTKF"),
        meta_entry(LeKF, N, R, N, false, false, false, "LEKF"),
        meta_entry(GtKF, N, R, N, false, false, false, "GTKF"),
        meta_entry(GeKF, N, R, N, false, false, false, "GEKF"),
        meta_entry(Jmp, N, N, N, false, true, true, "JMP"),
        meta_entry(Test, R, N, N, false, false, false, "TEST"),
        meta_entry(TestSet, W, R, N, false, false, false, "TESTSET"),
        meta_entry(ForPrep, RW, N, N, false, true, true, "FORPREP"),
        meta_entry(ForLoop, RW, N, N, false, true, true, "FORLOOP"),
        meta_entry(Call, RW, R, N, true, false, false, "CALL"),
        meta_entry(TailCall, R, R, N, true, true, false, "TAILCALL"),
        meta_entry(Return, R, N, N, true, true, false, "RETURN"),
        meta_entry(Closure, W, N, N, false, false, false, "CLOSURE"),
        meta_entry(VarargPrep, N, N, N, false, false, false, "VARARGPREP"),
        meta_entry(Vararg, W, N, N, false, false, false, "VARARG"),
        meta_entry(VarargExpand, R, N, N, true, false, false, "VARARGEXPAND"),
        meta_entry(ToString, W, R, N, false, false, false, "TOSTRING"),
        meta_entry(ToNumber, W, R, N, false, false, false, "TONUMBER"),
        meta_entry(Len, W, R, N, false, false, false, "LEN"),
    ]
};

impl OpCode {
    /// This opcode's metadata entry.
    pub fn meta(self) -> &'static OpCodeMeta {
        &OPCODE_META[self as usize]
    }

    /// Mnemonic used by the disassembler.
    pub fn name(self) -> &'static str {
        self.meta().name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn metadata_table_is_ordered_by_opcode() {
        for (index, meta) in OPCODE_META.iter().enumerate() {
            assert_eq!(
                meta.opcode as usize, index,
                "metadata entry {index} describes {:?}",
                meta.opcode
            );
        }
    }

    #[test]
    fn every_opcode_decodes_from_its_discriminant() {
        for raw in 0..OP_COUNT as u8 {
            let op = OpCode::from_u8(raw).expect("discriminant in range");
            assert_eq!(op as u8, raw);
        }
        assert!(OpCode::from_u8(OP_COUNT as u8).is_none());
    }

    #[test]
    fn terminators_are_marked() {
        assert!(OpCode::Return.meta().is_terminator);
        assert!(OpCode::Jmp.meta().is_branch);
        assert!(OpCode::TailCall.meta().is_terminator);
        assert!(!OpCode::Add.meta().is_terminator);
    }

    #[test]
    fn opcode_count_fits_encoding() {
        // 7 bits of opcode space.
        assert!(OP_COUNT <= 128);
    }
}
