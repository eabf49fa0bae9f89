//! Bytecode disassembly.
//!
//! Renders a proto for inspection: header, constant pools, then one line per
//! instruction with the operand access modes from the opcode metadata table
//! and resolved constant / jump-target annotations. Nested protos are dumped
//! recursively with indentation.

use crate::heap::Heap;
use crate::instruction::Instruction;
use crate::object::GcRef;
use crate::op_code::{OpCode, OpMode};
use crate::runtime::format_float;

fn mode_str(mode: OpMode) -> &'static str {
    match mode {
        OpMode::Read => "R",
        OpMode::Write => "W",
        OpMode::RW => "RW",
        OpMode::None => "",
    }
}

fn operand_modes(op: OpCode) -> String {
    let meta = op.meta();
    [meta.a, meta.b, meta.c]
        .iter()
        .map(|&m| mode_str(m))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Annotation for one instruction: constant content or jump target.
fn annotation(heap: &Heap, proto_ref: GcRef, pc: usize, instr: Instruction) -> String {
    let proto = heap.proto(proto_ref);
    match instr.op() {
        OpCode::LoadS | OpCode::GetGlobal | OpCode::SetGlobal => {
            let k = instr.const_index() as usize;
            match proto.str_constants.get(k) {
                Some(v) => match v.gc_ref() {
                    Some(s) => format!("K{} = {:?}", k, heap.string(s).view()),
                    None => String::new(),
                },
                None => String::new(),
            }
        }
        OpCode::LoadI => {
            let k = instr.const_index() as usize;
            proto
                .int_constants
                .get(k)
                .map(|v| format!("K{k} = {v}"))
                .unwrap_or_default()
        }
        OpCode::LoadF => {
            let k = instr.const_index() as usize;
            proto
                .float_constants
                .get(k)
                .map(|v| format!("K{} = {}", k, format_float(*v)))
                .unwrap_or_default()
        }
        OpCode::GetFieldS | OpCode::SetFieldS => {
            let k = instr.small_const_index() as usize;
            match proto.str_constants.get(k).and_then(|v| v.gc_ref()) {
                Some(s) => format!("K{} = {:?}", k, heap.string(s).view()),
                None => String::new(),
            }
        }
        OpCode::AddKI | OpCode::SubKI | OpCode::LtKI | OpCode::LeKI | OpCode::GtKI
        | OpCode::GeKI => {
            let k = instr.small_const_index() as usize;
            proto
                .int_constants
                .get(k)
                .map(|v| format!("K{k} = {v}"))
                .unwrap_or_default()
        }
        OpCode::AddKF | OpCode::SubKF | OpCode::LtKF | OpCode::LeKF | OpCode::GtKF
        | OpCode::GeKF => {
            let k = instr.small_const_index() as usize;
            proto
                .float_constants
                .get(k)
                .map(|v| format!("K{} = {}", k, format_float(*v)))
                .unwrap_or_default()
        }
        OpCode::IncGlobal | OpCode::DecGlobal => {
            let k = instr.large_const_index() as usize;
            match proto.str_constants.get(k).and_then(|v| v.gc_ref()) {
                Some(s) => format!("K{} = {:?}", k, heap.string(s).view()),
                None => String::new(),
            }
        }
        OpCode::Closure => format!("proto #{}", instr.const_index()),
        OpCode::Jmp => {
            let target = pc as i64 + instr.jump_offset() as i64 + 1;
            format!("to {target}")
        }
        OpCode::ForPrep | OpCode::ForLoop => {
            let target = pc as i64 + instr.signed_offset() as i64 + 1;
            format!("to {target}")
        }
        _ => String::new(),
    }
}

/// Disassembles a proto (and, recursively, its nested protos) into text.
pub fn dump_proto(heap: &Heap, proto_ref: GcRef, indent: usize) -> String {
    let proto = heap.proto(proto_ref);
    let pad = "  ".repeat(indent);
    let mut out = String::new();

    let source = proto
        .source_name
        .map(|s| heap.string(s).view().to_string())
        .unwrap_or_else(|| "?".to_string());
    out.push_str(&format!(
        "{pad}proto: {} params, {}, max registers {}, source {}\n",
        proto.num_params,
        if proto.is_vararg { "vararg" } else { "fixed" },
        proto.max_stack_size,
        source
    ));

    if !proto.str_constants.is_empty() {
        out.push_str(&format!("{pad}string constants:\n"));
        for (i, v) in proto.str_constants.iter().enumerate() {
            if let Some(s) = v.gc_ref() {
                out.push_str(&format!("{pad}  {i:>3}: {:?}\n", heap.string(s).view()));
            }
        }
    }
    if !proto.int_constants.is_empty() {
        out.push_str(&format!("{pad}integer constants:\n"));
        for (i, v) in proto.int_constants.iter().enumerate() {
            out.push_str(&format!("{pad}  {i:>3}: {v}\n"));
        }
    }
    if !proto.float_constants.is_empty() {
        out.push_str(&format!("{pad}float constants:\n"));
        for (i, v) in proto.float_constants.iter().enumerate() {
            out.push_str(&format!("{pad}  {i:>3}: {}\n", format_float(*v)));
        }
    }

    out.push_str(&format!("{pad}code:\n"));
    for (pc, &instr) in proto.code.iter().enumerate() {
        let op = instr.op();
        let note = annotation(heap, proto_ref, pc, instr);
        let modes = operand_modes(op);
        out.push_str(&format!(
            "{pad}  {pc:>4}  {:<12} a={:<3} b={:<3} c={:<3} {:<6} {}\n",
            op.name(),
            instr.a(),
            instr.b(),
            instr.c(),
            modes,
            note
        ));
    }

    for &nested in &proto.protos {
        out.push_str(&dump_proto(heap, nested, indent + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Proto;

    #[test]
    fn dump_renders_constants_and_jump_targets() {
        let mut heap = Heap::new();
        let mut proto = Proto::new();
        let name = heap.new_string("chunk");
        proto.source_name = Some(name);
        proto.int_constants.push(42);
        proto.code.push(Instruction::make_load_i(1, 0));
        proto.code.push(Instruction::make_jmp(-2));
        proto.code.push(Instruction::make_return(0, 0));
        let r = heap.new_proto(proto);

        let text = dump_proto(&heap, r, 0);
        assert!(text.contains("LOADI"));
        assert!(text.contains("K0 = 42"));
        assert!(text.contains("to 0"));
        assert!(text.contains("RETURN"));
        assert!(text.contains("source chunk"));
    }
}
