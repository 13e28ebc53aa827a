use std::cmp::Ordering;
use std::fmt;

use monicelli_bytecode::{Constant, ValueType};

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    /// UTF-16 code unit
    Char(u16),
    Float(f32),
    Bool(bool),
    Double(f64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Char(_) => ValueType::Char,
            Value::Float(_) => ValueType::Float,
            Value::Bool(_) => ValueType::Bool,
            Value::Double(_) => ValueType::Double,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    /// The initial value of a slot of type `ty`.
    pub fn zero(ty: ValueType) -> Value {
        match ty {
            ValueType::Int => Value::Int(0),
            ValueType::Char => Value::Char(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Bool => Value::Bool(false),
            ValueType::Double => Value::Double(0.0),
        }
    }

    pub fn from_constant(constant: &Constant) -> Option<Value> {
        match constant {
            Constant::Int(n) => Some(Value::Int(*n)),
            Constant::Char(c) => Some(Value::Char(*c)),
            Constant::Float(x) => Some(Value::Float(*x)),
            Constant::Bool(b) => Some(Value::Bool(*b)),
            Constant::Double(x) => Some(Value::Double(*x)),
            Constant::Str(_) => None,
        }
    }

    /// Primitive conversion.
    ///
    /// Narrowing integral conversions truncate, float to integral saturates
    /// with NaN becoming zero, and conversion to `Bool` tests for non-zero.
    pub fn cast(self, to: ValueType) -> Value {
        match to {
            ValueType::Int => Value::Int(match self {
                Value::Int(n) => n,
                Value::Char(c) => c as i64,
                Value::Float(x) => x as i64,
                Value::Bool(b) => b as i64,
                Value::Double(x) => x as i64,
            }),
            ValueType::Char => Value::Char(match self {
                Value::Int(n) => n as u16,
                Value::Char(c) => c,
                Value::Float(x) => (x as i32) as u16,
                Value::Bool(b) => b as u16,
                Value::Double(x) => (x as i32) as u16,
            }),
            ValueType::Float => Value::Float(match self {
                Value::Int(n) => n as f32,
                Value::Char(c) => c as f32,
                Value::Float(x) => x,
                Value::Bool(b) => b as u8 as f32,
                Value::Double(x) => x as f32,
            }),
            ValueType::Bool => Value::Bool(match self {
                Value::Int(n) => n != 0,
                Value::Char(c) => c != 0,
                Value::Float(x) => x != 0.0,
                Value::Bool(b) => b,
                Value::Double(x) => x != 0.0,
            }),
            ValueType::Double => Value::Double(match self {
                Value::Int(n) => n as f64,
                Value::Char(c) => c as f64,
                Value::Float(x) => x as f64,
                Value::Bool(b) => b as u8 as f64,
                Value::Double(x) => x,
            }),
        }
    }

    /// Three-way comparison of two values of the same type.
    ///
    /// Floats use the boxed total order: `-0.0 < 0.0`, and NaN is equal to
    /// itself and greater than everything else.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(compare_f64(*a as f64, *b as f64)),
            (Value::Double(a), Value::Double(b)) => Some(compare_f64(*a, *b)),
            _ => None,
        }
    }
}

fn canonical_bits(x: f64) -> i64 {
    if x.is_nan() {
        0x7ff8_0000_0000_0000
    } else {
        x.to_bits() as i64
    }
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    if a < b {
        Ordering::Less
    } else if a > b {
        Ordering::Greater
    } else {
        canonical_bits(a).cmp(&canonical_bits(b))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Char(c) => write!(f, "{}", char::from_u32(*c as u32).unwrap_or('\u{FFFD}')),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Float(x) => f.write_str(&format_float(*x as f64, &format!("{:e}", x.abs()))),
            Value::Double(x) => f.write_str(&format_float(*x, &format!("{:e}", x.abs()))),
        }
    }
}

/// Render a float the way the JVM prints it: plain decimal with at least one
/// fractional digit in `[1e-3, 1e7)`, otherwise `d.dddE<exp>`.
///
/// `shortest` is the shortest round-trip scientific rendering of `|x|` at the
/// value's own precision, e.g. `1.25e3`.
fn format_float(x: f64, shortest: &str) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    let sign = if x.is_sign_negative() { "-" } else { "" };
    if x.is_infinite() {
        return format!("{}Infinity", sign);
    }
    if x == 0.0 {
        return format!("{}0.0", sign);
    }

    let (mantissa, exp) = match shortest.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (shortest, 0),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let magnitude = x.abs();

    let body = if (1e-3..1e7).contains(&magnitude) {
        if exp >= 0 {
            let point = exp as usize + 1;
            if digits.len() > point {
                format!("{}.{}", &digits[..point], &digits[point..])
            } else {
                format!("{}{}.0", digits, "0".repeat(point - digits.len()))
            }
        } else {
            format!("0.{}{}", "0".repeat((-exp - 1) as usize), digits)
        }
    } else {
        let rest = if digits.len() > 1 { &digits[1..] } else { "0" };
        format!("{}.{}E{}", &digits[..1], rest, exp)
    };

    format!("{}{}", sign, body)
}
