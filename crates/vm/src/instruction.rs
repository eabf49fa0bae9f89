//! Fixed-width instruction encoding.
//!
//! Every instruction is one 32-bit word: a 7-bit opcode in bits 31..25 and a
//! 25-bit operand payload decoded per opcode. Operand layouts:
//!
//! | Field | Bits | Notes |
//! |---|---|---|
//! | `A` | 0..8 | register |
//! | `B` | 8..16 | register / count / invert bit |
//! | `C` | 16..24 | register / count |
//! | flag | 24 | self-call marker |
//! | `kB` | 8..25 | 17-bit constant or proto index |
//! | `kC` | 16..25 | 9-bit small constant index |
//! | `sB` | 8..25 | 17-bit signed offset / immediate, bias −65536 |
//! | `sC` | 16..25 | 9-bit signed immediate, bias −256 |
//! | `k25` | 0..25 | 25-bit constant index |
//! | `sJ` | 0..25 | 25-bit signed jump offset, bias −8388608 |

use num_traits::FromPrimitive;

use crate::op_code::OpCode;

const OP_SHIFT: u32 = 25;
const IMM17_BIAS: i32 = 65536;
const IMM9_BIAS: i32 = 256;
const JUMP25_BIAS: i32 = 8_388_608;

/// One 32-bit bytecode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub raw: u32,
}

impl Instruction {
    /// Decodes the opcode. Words are only produced by the constructors below,
    /// so the 7-bit field always names a valid opcode.
    pub fn op(self) -> OpCode {
        let raw_op = ((self.raw >> OP_SHIFT) & 0x7F) as u8;
        OpCode::from_u8(raw_op).expect("instruction word carries a valid opcode")
    }

    /// Operand A: bits 0..8.
    pub fn a(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Operand B: bits 8..16.
    pub fn b(self) -> u8 {
        ((self.raw >> 8) & 0xFF) as u8
    }

    /// Operand C: bits 16..24.
    pub fn c(self) -> u8 {
        ((self.raw >> 16) & 0xFF) as u8
    }

    /// Flag bit 24 (self-call marker on `Call`).
    pub fn flag_bit(self) -> bool {
        (self.raw >> 24) & 1 != 0
    }

    /// Boolean payload of `LoadBool` (bit 8).
    pub fn bool_value(self) -> bool {
        (self.raw >> 8) & 1 != 0
    }

    /// Skip marker of `LoadBool` (bit 9).
    pub fn skip_next(self) -> bool {
        (self.raw >> 9) & 1 != 0
    }

    /// 17-bit constant or proto index at bits 8..25.
    pub fn const_index(self) -> u32 {
        (self.raw >> 8) & 0x1FFFF
    }

    /// 9-bit small constant index at bits 16..25.
    pub fn small_const_index(self) -> u32 {
        (self.raw >> 16) & 0x1FF
    }

    /// 17-bit signed offset / immediate at bits 8..25.
    pub fn signed_offset(self) -> i32 {
        ((self.raw >> 8) & 0x1FFFF) as i32 - IMM17_BIAS
    }

    /// 9-bit signed immediate at bits 16..25.
    pub fn signed_imm9(self) -> i32 {
        ((self.raw >> 16) & 0x1FF) as i32 - IMM9_BIAS
    }

    /// 25-bit constant index at bits 0..25.
    pub fn large_const_index(self) -> u32 {
        self.raw & 0x1FF_FFFF
    }

    /// 25-bit signed jump offset at bits 0..25.
    pub fn jump_offset(self) -> i32 {
        (self.raw & 0x1FF_FFFF) as i32 - JUMP25_BIAS
    }
}

fn pack(op: OpCode, payload: u32) -> Instruction {
    debug_assert_eq!(payload & !0x01FF_FFFF, 0, "operand payload overflows 25 bits");
    Instruction {
        raw: ((op as u32) << OP_SHIFT) | (payload & 0x01FF_FFFF),
    }
}

fn pack_abc(op: OpCode, a: u8, b: u8, c: u8) -> Instruction {
    pack(op, a as u32 | ((b as u32) << 8) | ((c as u32) << 16))
}

fn pack_a_k17(op: OpCode, a: u8, k: u32) -> Instruction {
    debug_assert!(k <= 0x1FFFF, "constant index overflows 17 bits");
    pack(op, a as u32 | (k << 8))
}

fn pack_ab_k9(op: OpCode, a: u8, b: u8, k: u32) -> Instruction {
    debug_assert!(k <= 0x1FF, "small constant index overflows 9 bits");
    pack(op, a as u32 | ((b as u32) << 8) | (k << 16))
}

fn pack_a_s17(op: OpCode, a: u8, value: i32) -> Instruction {
    debug_assert!((-IMM17_BIAS..IMM17_BIAS).contains(&value));
    pack(op, a as u32 | (((value + IMM17_BIAS) as u32) << 8))
}

fn pack_ab_s9(op: OpCode, a: u8, b: u8, value: i32) -> Instruction {
    debug_assert!((-IMM9_BIAS..IMM9_BIAS).contains(&value));
    pack(
        op,
        a as u32 | ((b as u32) << 8) | (((value + IMM9_BIAS) as u32) << 16),
    )
}

impl Instruction {
    // --- Constant loads ---

    pub fn make_load_nil(a: u8, extra: u8) -> Self {
        pack_abc(OpCode::LoadNil, a, extra, 0)
    }

    pub fn make_load_bool(a: u8, value: bool, skip: bool) -> Self {
        pack(
            OpCode::LoadBool,
            a as u32 | ((value as u32) << 8) | ((skip as u32) << 9),
        )
    }

    pub fn make_load_imm(a: u8, imm: i32) -> Self {
        pack_a_s17(OpCode::LoadImm, a, imm)
    }

    pub fn make_load_i(a: u8, k: u32) -> Self {
        pack_a_k17(OpCode::LoadI, a, k)
    }

    pub fn make_load_f(a: u8, k: u32) -> Self {
        pack_a_k17(OpCode::LoadF, a, k)
    }

    pub fn make_load_s(a: u8, k: u32) -> Self {
        pack_a_k17(OpCode::LoadS, a, k)
    }

    // --- Moves and globals ---

    pub fn make_move(a: u8, b: u8) -> Self {
        pack_abc(OpCode::Move, a, b, 0)
    }

    pub fn make_get_global(a: u8, k: u32) -> Self {
        pack_a_k17(OpCode::GetGlobal, a, k)
    }

    pub fn make_set_global(a: u8, k: u32) -> Self {
        pack_a_k17(OpCode::SetGlobal, a, k)
    }

    pub fn make_inc_global(k: u32) -> Self {
        pack(OpCode::IncGlobal, k)
    }

    pub fn make_dec_global(k: u32) -> Self {
        pack(OpCode::DecGlobal, k)
    }

    // --- Upvalues ---

    pub fn make_get_upval(a: u8, b: u8) -> Self {
        pack_abc(OpCode::GetUpval, a, b, 0)
    }

    pub fn make_set_upval(a: u8, b: u8) -> Self {
        pack_abc(OpCode::SetUpval, a, b, 0)
    }

    pub fn make_inc_upvalue(a: u8) -> Self {
        pack_abc(OpCode::IncUpvalue, a, 0, 0)
    }

    pub fn make_dec_upvalue(a: u8) -> Self {
        pack_abc(OpCode::DecUpvalue, a, 0, 0)
    }

    // --- Tables ---

    pub fn make_new_table(a: u8, array_hint: u8, hash_hint: u8) -> Self {
        pack_abc(OpCode::NewTable, a, array_hint, hash_hint)
    }

    pub fn make_get_field(a: u8, b: u8, c: u8) -> Self {
        pack_abc(OpCode::GetField, a, b, c)
    }

    pub fn make_get_field_i(a: u8, b: u8, imm: u32) -> Self {
        pack_ab_k9(OpCode::GetFieldI, a, b, imm)
    }

    pub fn make_get_field_s(a: u8, b: u8, k: u32) -> Self {
        pack_ab_k9(OpCode::GetFieldS, a, b, k)
    }

    pub fn make_set_field(a: u8, b: u8, c: u8) -> Self {
        pack_abc(OpCode::SetField, a, b, c)
    }

    pub fn make_set_field_i(a: u8, b: u8, imm: u32) -> Self {
        pack_ab_k9(OpCode::SetFieldI, a, b, imm)
    }

    pub fn make_set_field_s(a: u8, b: u8, k: u32) -> Self {
        pack_ab_k9(OpCode::SetFieldS, a, b, k)
    }

    pub fn make_self_field(a: u8, b: u8, c: u8) -> Self {
        pack_abc(OpCode::SelfField, a, b, c)
    }

    pub fn make_set_list(a: u8, num_fields: u8, start: u8) -> Self {
        pack_abc(OpCode::SetList, a, num_fields, start)
    }

    // --- Arithmetic ---

    pub fn make_arith(op: OpCode, a: u8, b: u8, c: u8) -> Self {
        pack_abc(op, a, b, c)
    }

    pub fn make_arith_k(op: OpCode, a: u8, b: u8, k: u32) -> Self {
        pack_ab_k9(op, a, b, k)
    }

    pub fn make_arith_imm(op: OpCode, a: u8, b: u8, imm: i32) -> Self {
        pack_ab_s9(op, a, b, imm)
    }

    pub fn make_add_local(a: u8, b: u8) -> Self {
        pack_abc(OpCode::AddLocal, a, b, 0)
    }

    pub fn make_unm(a: u8, b: u8) -> Self {
        pack_abc(OpCode::Unm, a, b, 0)
    }

    pub fn make_inc_local(a: u8) -> Self {
        pack_abc(OpCode::IncLocal, a, 0, 0)
    }

    pub fn make_dec_local(a: u8) -> Self {
        pack_abc(OpCode::DecLocal, a, 0, 0)
    }

    pub fn make_bnot(a: u8, b: u8) -> Self {
        pack_abc(OpCode::Bnot, a, b, 0)
    }

    // --- Comparisons (test instructions) ---

    /// Register/register comparison: operands in B and C.
    pub fn make_cmp(op: OpCode, b: u8, c: u8) -> Self {
        pack_abc(op, 0, b, c)
    }

    /// Register/small-constant comparison: register in B, pool index in kC.
    pub fn make_cmp_k(op: OpCode, b: u8, k: u32) -> Self {
        pack_ab_k9(op, 0, b, k)
    }

    /// Register/immediate comparison: register in A, immediate in sB.
    pub fn make_cmp_imm(op: OpCode, reg: u8, imm: i32) -> Self {
        pack_a_s17(op, reg, imm)
    }

    // --- Control flow ---

    pub fn make_jmp(offset: i32) -> Self {
        debug_assert!((-JUMP25_BIAS..JUMP25_BIAS).contains(&offset));
        pack(OpCode::Jmp, (offset + JUMP25_BIAS) as u32)
    }

    pub fn make_test(a: u8, invert: bool) -> Self {
        pack(OpCode::Test, a as u32 | ((invert as u32) << 8))
    }

    pub fn make_test_set(a: u8, b: u8, invert: bool) -> Self {
        pack_abc(OpCode::TestSet, a, b, invert as u8)
    }

    pub fn make_for_prep(a: u8, offset: i32) -> Self {
        pack_a_s17(OpCode::ForPrep, a, offset)
    }

    pub fn make_for_loop(a: u8, offset: i32) -> Self {
        pack_a_s17(OpCode::ForLoop, a, offset)
    }

    // --- Calls ---

    pub fn make_call(a: u8, num_args: u8, num_results: u8, is_self_call: bool) -> Self {
        pack(
            OpCode::Call,
            a as u32
                | ((num_args as u32) << 8)
                | ((num_results as u32) << 16)
                | ((is_self_call as u32) << 24),
        )
    }

    pub fn make_tail_call(a: u8, num_args: u8, is_self_call: bool) -> Self {
        pack_abc(OpCode::TailCall, a, num_args, is_self_call as u8)
    }

    pub fn make_return(a: u8, num_results: u8) -> Self {
        pack_abc(OpCode::Return, a, num_results, 0)
    }

    // --- Closures ---

    pub fn make_closure(a: u8, proto_index: u32) -> Self {
        pack_a_k17(OpCode::Closure, a, proto_index)
    }

    // --- Varargs ---

    pub fn make_vararg_prep(num_params: u8) -> Self {
        pack_abc(OpCode::VarargPrep, num_params, 0, 0)
    }

    pub fn make_vararg(a: u8, n: u8) -> Self {
        pack_abc(OpCode::Vararg, a, n, 0)
    }

    pub fn make_vararg_expand(table_reg: u8, start: u8) -> Self {
        pack_abc(OpCode::VarargExpand, table_reg, start, 0)
    }

    // --- Coercion and length ---

    pub fn make_to_string(a: u8, b: u8) -> Self {
        pack_abc(OpCode::ToString, a, b, 0)
    }

    pub fn make_to_number(a: u8, b: u8) -> Self {
        pack_abc(OpCode::ToNumber, a, b, 0)
    }

    pub fn make_len(a: u8, b: u8) -> Self {
        pack_abc(OpCode::Len, a, b, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abc_round_trips() {
        let i = Instruction::make_get_field(7, 130, 255);
        assert_eq!(i.op(), OpCode::GetField);
        assert_eq!(i.a(), 7);
        assert_eq!(i.b(), 130);
        assert_eq!(i.c(), 255);
    }

    #[test]
    fn const_index_uses_17_bits() {
        let i = Instruction::make_load_s(3, 0x1FFFF);
        assert_eq!(i.op(), OpCode::LoadS);
        assert_eq!(i.a(), 3);
        assert_eq!(i.const_index(), 0x1FFFF);
    }

    #[test]
    fn signed_immediates_cover_their_ranges() {
        for imm in [-65536, -1, 0, 1, 65535] {
            let i = Instruction::make_load_imm(0, imm);
            assert_eq!(i.signed_offset(), imm);
        }
        for imm in [-256, -1, 0, 255] {
            let i = Instruction::make_arith_imm(OpCode::AddImm, 1, 2, imm);
            assert_eq!(i.signed_imm9(), imm);
            assert_eq!(i.a(), 1);
            assert_eq!(i.b(), 2);
        }
    }

    #[test]
    fn jump_offsets_cover_25_bits() {
        for offset in [-8_388_608, -1, 0, 1, 8_388_607] {
            let i = Instruction::make_jmp(offset);
            assert_eq!(i.op(), OpCode::Jmp);
            assert_eq!(i.jump_offset(), offset);
        }
    }

    #[test]
    fn load_bool_packs_value_and_skip() {
        let i = Instruction::make_load_bool(4, true, false);
        assert!(i.bool_value());
        assert!(!i.skip_next());
        let j = Instruction::make_load_bool(4, false, true);
        assert!(!j.bool_value());
        assert!(j.skip_next());
    }

    #[test]
    fn call_packs_self_flag_in_bit_24() {
        let i = Instruction::make_call(2, 3, 1, true);
        assert_eq!(i.a(), 2);
        assert_eq!(i.b(), 3);
        assert_eq!(i.c(), 1);
        assert!(i.flag_bit());
        assert!(!Instruction::make_call(2, 3, 1, false).flag_bit());
    }

    #[test]
    fn cmp_imm_keeps_register_in_a() {
        let i = Instruction::make_cmp_imm(OpCode::LtImm, 9, -100);
        assert_eq!(i.a(), 9);
        assert_eq!(i.signed_offset(), -100);
    }

    #[test]
    fn large_const_index_uses_25_bits() {
        let i = Instruction::make_inc_global(0x1FF_FFFF);
        assert_eq!(i.large_const_index(), 0x1FF_FFFF);
    }

    #[test]
    fn small_const_index_round_trips() {
        let i = Instruction::make_arith_k(OpCode::AddKI, 1, 2, 511);
        assert_eq!(i.small_const_index(), 511);
    }
}
