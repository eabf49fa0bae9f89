//! Arithmetic, bitwise and comparison semantics.
//!
//! Numeric coercion comes first: integer op integer stays integer (two's
//! complement wraparound on add/sub/mul), any float operand promotes the
//! result, division is always float, `%` follows the sign of the divisor and
//! `**` always yields a float. String operands get one number-parse attempt.
//! Only after coercion fails does metamethod dispatch run — left operand
//! first, then right — and only after that is the operation a type error.

use std::cmp::Ordering;

use sable_core::{Error, Result};

use crate::metatable::MetaMethod;
use crate::runtime::parse_number;
use crate::runtime::Runtime;
use crate::value::Value;

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    pub(crate) fn metamethod(self) -> MetaMethod {
        match self {
            ArithOp::Add => MetaMethod::Add,
            ArithOp::Sub => MetaMethod::Sub,
            ArithOp::Mul => MetaMethod::Mul,
            ArithOp::Div => MetaMethod::Div,
            ArithOp::Mod => MetaMethod::Mod,
            ArithOp::Pow => MetaMethod::Pow,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::Pow => "**",
        }
    }
}

/// Bitwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BitOp {
    pub(crate) fn metamethod(self) -> MetaMethod {
        match self {
            BitOp::And => MetaMethod::BAnd,
            BitOp::Or => MetaMethod::BOr,
            BitOp::Xor => MetaMethod::BXor,
            BitOp::Shl => MetaMethod::Shl,
            BitOp::Shr => MetaMethod::Shr,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BitOp::And => "&",
            BitOp::Or => "|",
            BitOp::Xor => "^",
            BitOp::Shl => "<<",
            BitOp::Shr => ">>",
        }
    }
}

/// Mathematical modulo: the result carries the sign of the divisor.
fn int_modulo(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 {
        r.wrapping_add(b)
    } else {
        r
    }
}

/// Float modulo with the sign of the divisor.
fn float_modulo(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// Logical shift left with Lua-style out-of-range behavior: shifts of 64 or
/// more produce zero, negative shifts go the other way.
fn shift_left(a: i64, n: i64) -> i64 {
    if n < 0 {
        shift_right(a, n.wrapping_neg())
    } else if n >= 64 {
        0
    } else {
        ((a as u64) << n) as i64
    }
}

fn shift_right(a: i64, n: i64) -> i64 {
    if n < 0 {
        shift_left(a, n.wrapping_neg())
    } else if n >= 64 {
        0
    } else {
        ((a as u64) >> n) as i64
    }
}

/// Computes a numeric arithmetic result, or `None` when an operand is not
/// numeric. Integer `%` by zero is the one failing numeric case.
pub(crate) fn arith_numeric(op: ArithOp, l: Value, r: Value) -> Result<Option<Value>> {
    let result = match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => match op {
            ArithOp::Add => Value::Integer(a.wrapping_add(b)),
            ArithOp::Sub => Value::Integer(a.wrapping_sub(b)),
            ArithOp::Mul => Value::Integer(a.wrapping_mul(b)),
            ArithOp::Div => Value::Number(a as f64 / b as f64),
            ArithOp::Mod => {
                if b == 0 {
                    return Err(Error::runtime_msg("attempt to perform 'n % 0'"));
                }
                Value::Integer(int_modulo(a, b))
            }
            ArithOp::Pow => Value::Number((a as f64).powf(b as f64)),
        },
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => match op {
                ArithOp::Add => Value::Number(a + b),
                ArithOp::Sub => Value::Number(a - b),
                ArithOp::Mul => Value::Number(a * b),
                ArithOp::Div => Value::Number(a / b),
                ArithOp::Mod => Value::Number(float_modulo(a, b)),
                ArithOp::Pow => Value::Number(a.powf(b)),
            },
            _ => return Ok(None),
        },
    };
    Ok(Some(result))
}

impl Runtime {
    /// Full binary arithmetic: numeric fast path, string number-parse, then
    /// metamethods on the left and right operands, then a type error.
    pub fn arith(&mut self, op: ArithOp, l: Value, r: Value) -> Result<Value> {
        if let Some(result) = arith_numeric(op, l, r).map_err(|e| self.locate(e))? {
            return Ok(result);
        }

        // One parse attempt per string operand.
        let coerced_l = self.coerce_operand(l);
        let coerced_r = self.coerce_operand(r);
        if coerced_l.is_numeric() && coerced_r.is_numeric() {
            if let Some(result) =
                arith_numeric(op, coerced_l, coerced_r).map_err(|e| self.locate(e))?
            {
                return Ok(result);
            }
        }

        let mm = self.binary_metamethod(op.metamethod(), l, r);
        if mm.is_callable() {
            return self.call_metamethod(mm, &[l, r]);
        }

        Err(Error::type_error(
            format!(
                "attempt to perform arithmetic ('{}') on a {} and a {}",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ),
            self.current_location(),
        ))
    }

    /// Unary minus.
    pub fn arith_negate(&mut self, v: Value) -> Result<Value> {
        match v {
            Value::Integer(i) => return Ok(Value::Integer(i.wrapping_neg())),
            Value::Number(f) => return Ok(Value::Number(-f)),
            _ => {}
        }
        let coerced = self.coerce_operand(v);
        match coerced {
            Value::Integer(i) => return Ok(Value::Integer(i.wrapping_neg())),
            Value::Number(f) => return Ok(Value::Number(-f)),
            _ => {}
        }
        let mm = self.get_metamethod(v, MetaMethod::Unm);
        if mm.is_callable() {
            return self.call_metamethod(mm, &[v]);
        }
        Err(Error::type_error(
            format!("attempt to perform arithmetic on a {} value", v.type_name()),
            self.current_location(),
        ))
    }

    /// Binary bitwise operators. Operands must be integers or
    /// integer-valued floats; other floats are a type error even with a
    /// fraction of 0.5.
    pub fn bitwise(&mut self, op: BitOp, l: Value, r: Value) -> Result<Value> {
        if let (Some(a), Some(b)) = (l.as_integer_strict(), r.as_integer_strict()) {
            let result = match op {
                BitOp::And => a & b,
                BitOp::Or => a | b,
                BitOp::Xor => a ^ b,
                BitOp::Shl => shift_left(a, b),
                BitOp::Shr => shift_right(a, b),
            };
            return Ok(Value::Integer(result));
        }

        let mm = self.binary_metamethod(op.metamethod(), l, r);
        if mm.is_callable() {
            return self.call_metamethod(mm, &[l, r]);
        }

        Err(Error::type_error(
            format!(
                "attempt to perform bitwise '{}' on a {} and a {}",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ),
            self.current_location(),
        ))
    }

    /// Bitwise complement.
    pub fn bitwise_not(&mut self, v: Value) -> Result<Value> {
        if let Some(a) = v.as_integer_strict() {
            return Ok(Value::Integer(!a));
        }
        let mm = self.get_metamethod(v, MetaMethod::BNot);
        if mm.is_callable() {
            return self.call_metamethod(mm, &[v]);
        }
        Err(Error::type_error(
            format!("attempt to perform bitwise not on a {} value", v.type_name()),
            self.current_location(),
        ))
    }

    /// `==` with metamethod fallback. `__eq` only fires for two heap objects
    /// of the same kind that are not identical.
    pub fn compare_equal(&mut self, l: Value, r: Value) -> Result<bool> {
        if self.heap.values_equal(l, r) {
            return Ok(true);
        }
        let same_kind_heap = matches!(
            (l, r),
            (Value::Table(_), Value::Table(_)) | (Value::Userdata(_), Value::Userdata(_))
        );
        if same_kind_heap {
            let mm = self.binary_metamethod(MetaMethod::Eq, l, r);
            if mm.is_callable() {
                let result = self.call_metamethod(mm, &[l, r])?;
                return Ok(result.is_truthy());
            }
        }
        Ok(false)
    }

    /// `<` with metamethod fallback. NaN comparisons are false, never
    /// errors.
    pub fn compare_less(&mut self, l: Value, r: Value) -> Result<bool> {
        if l.is_numeric() && r.is_numeric() {
            return Ok(matches!(
                self.heap.value_compare(l, r),
                Some(Ordering::Less)
            ));
        }
        match self.heap.value_compare(l, r) {
            Some(ordering) => Ok(ordering == Ordering::Less),
            None => {
                let mm = self.binary_metamethod(MetaMethod::Lt, l, r);
                if mm.is_callable() {
                    let result = self.call_metamethod(mm, &[l, r])?;
                    return Ok(result.is_truthy());
                }
                Err(self.comparison_error(l, r))
            }
        }
    }

    /// `<=`: `__le` when defined; otherwise derived as `!(r < l)`.
    pub fn compare_less_equal(&mut self, l: Value, r: Value) -> Result<bool> {
        if l.is_numeric() && r.is_numeric() {
            return Ok(matches!(
                self.heap.value_compare(l, r),
                Some(Ordering::Less | Ordering::Equal)
            ));
        }
        match self.heap.value_compare(l, r) {
            Some(ordering) => Ok(ordering != Ordering::Greater),
            None => {
                let le = self.binary_metamethod(MetaMethod::Le, l, r);
                if le.is_callable() {
                    let result = self.call_metamethod(le, &[l, r])?;
                    return Ok(result.is_truthy());
                }
                let lt = self.binary_metamethod(MetaMethod::Lt, l, r);
                if lt.is_callable() {
                    let result = self.call_metamethod(lt, &[r, l])?;
                    return Ok(!result.is_truthy());
                }
                Err(self.comparison_error(l, r))
            }
        }
    }

    /// Metamethod lookup across both operands, left first.
    fn binary_metamethod(&self, mm: MetaMethod, l: Value, r: Value) -> Value {
        let left = self.get_metamethod(l, mm);
        if left.is_callable() {
            return left;
        }
        self.get_metamethod(r, mm)
    }

    fn coerce_operand(&self, v: Value) -> Value {
        match v {
            Value::String(r) => match parse_number(self.heap.string(r).view()) {
                Some(parsed) => parsed,
                None => v,
            },
            _ => v,
        }
    }

    fn comparison_error(&self, l: Value, r: Value) -> Error {
        Error::type_error(
            format!(
                "attempt to compare {} with {}",
                l.type_name(),
                r.type_name()
            ),
            self.current_location(),
        )
    }

    fn locate(&self, err: Error) -> Error {
        err.or_location(self.current_location())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integer_and_wraps() {
        assert!(matches!(
            arith_numeric(ArithOp::Add, Value::Integer(2), Value::Integer(3)).unwrap(),
            Some(Value::Integer(5))
        ));
        assert!(matches!(
            arith_numeric(ArithOp::Mul, Value::Integer(i64::MAX), Value::Integer(2)).unwrap(),
            Some(Value::Integer(-2))
        ));
    }

    #[test]
    fn mixed_operands_promote_to_float() {
        let out = arith_numeric(ArithOp::Add, Value::Integer(1), Value::Number(0.5))
            .unwrap()
            .unwrap();
        assert!(matches!(out, Value::Number(f) if f == 1.5));
    }

    #[test]
    fn division_is_always_float() {
        let out = arith_numeric(ArithOp::Div, Value::Integer(7), Value::Integer(2))
            .unwrap()
            .unwrap();
        assert!(matches!(out, Value::Number(f) if f == 3.5));
        let by_zero = arith_numeric(ArithOp::Div, Value::Integer(1), Value::Integer(0))
            .unwrap()
            .unwrap();
        assert!(matches!(by_zero, Value::Number(f) if f.is_infinite()));
    }

    #[test]
    fn modulo_takes_sign_of_divisor() {
        assert!(matches!(
            arith_numeric(ArithOp::Mod, Value::Integer(-5), Value::Integer(3)).unwrap(),
            Some(Value::Integer(1))
        ));
        assert!(matches!(
            arith_numeric(ArithOp::Mod, Value::Integer(5), Value::Integer(-3)).unwrap(),
            Some(Value::Integer(-1))
        ));
        assert!(arith_numeric(ArithOp::Mod, Value::Integer(1), Value::Integer(0)).is_err());
    }

    #[test]
    fn power_always_yields_float() {
        let out = arith_numeric(ArithOp::Pow, Value::Integer(2), Value::Integer(10))
            .unwrap()
            .unwrap();
        assert!(matches!(out, Value::Number(f) if f == 1024.0));
    }

    #[test]
    fn shifts_saturate_past_word_width() {
        assert_eq!(shift_left(1, 64), 0);
        assert_eq!(shift_right(-1, 63), 1);
        assert_eq!(shift_left(1, -1), 0);
        assert_eq!(shift_left(3, 2), 12);
    }

    #[test]
    fn runtime_arith_parses_string_operands() {
        let mut rt = Runtime::new();
        let s = rt.heap.new_string("10");
        let out = rt
            .arith(ArithOp::Add, Value::String(s), Value::Integer(5))
            .unwrap();
        assert!(matches!(out, Value::Integer(15)));
    }

    #[test]
    fn runtime_arith_rejects_non_numeric() {
        let mut rt = Runtime::new();
        let err = rt
            .arith(ArithOp::Add, Value::Boolean(true), Value::Integer(5))
            .unwrap_err();
        assert_eq!(err.kind, sable_core::ErrorKind::Type);
    }

    #[test]
    fn bitwise_accepts_integral_floats_only() {
        let mut rt = Runtime::new();
        let out = rt
            .bitwise(BitOp::And, Value::Number(6.0), Value::Integer(3))
            .unwrap();
        assert!(matches!(out, Value::Integer(2)));
        assert!(rt
            .bitwise(BitOp::And, Value::Number(6.5), Value::Integer(3))
            .is_err());
    }

    #[test]
    fn nan_compares_false_without_error() {
        let mut rt = Runtime::new();
        let nan = Value::Number(f64::NAN);
        assert!(!rt.compare_less(nan, Value::Integer(1)).unwrap());
        assert!(!rt.compare_less_equal(nan, nan).unwrap());
        assert!(!rt.compare_equal(nan, nan).unwrap());
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        let mut rt = Runtime::new();
        let a = rt.heap.new_string("apple");
        let b = rt.heap.new_string("banana");
        assert!(rt.compare_less(Value::String(a), Value::String(b)).unwrap());
        assert!(rt
            .compare_less_equal(Value::String(a), Value::String(a))
            .unwrap());
    }

    #[test]
    fn ordering_tables_without_metamethods_errors() {
        let mut rt = Runtime::new();
        let a = rt.heap.new_table(0, 0);
        let b = rt.heap.new_table(0, 0);
        assert!(rt.compare_less(Value::Table(a), Value::Table(b)).is_err());
        assert!(!rt.compare_equal(Value::Table(a), Value::Table(b)).unwrap());
    }
}
