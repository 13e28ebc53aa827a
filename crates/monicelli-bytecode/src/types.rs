use std::fmt;

/// Types of operand-stack values and local slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// 64-bit signed integer
    Int = 1,
    /// 16-bit character code unit
    Char = 2,
    /// 32-bit float
    Float = 3,
    Bool = 4,
    /// 64-bit float
    Double = 5,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Int => "Int",
            ValueType::Char => "Char",
            ValueType::Float => "Float",
            ValueType::Bool => "Bool",
            ValueType::Double => "Double",
        }
    }

    /// Whether arithmetic is defined on this type.
    pub fn is_numeric(self) -> bool {
        !matches!(self, ValueType::Bool)
    }

    /// The value a fresh slot of this type holds.
    pub fn zero(self) -> Constant {
        match self {
            ValueType::Int => Constant::Int(0),
            ValueType::Char => Constant::Char(0),
            ValueType::Float => Constant::Float(0.0),
            ValueType::Bool => Constant::Bool(false),
            ValueType::Double => Constant::Double(0.0),
        }
    }
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ValueType::Int),
            2 => Ok(ValueType::Char),
            3 => Ok(ValueType::Float),
            4 => Ok(ValueType::Bool),
            5 => Ok(ValueType::Double),
            other => Err(other),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter and return types of a code block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    pub params: Vec<ValueType>,
    /// `None` for blocks that return no value
    pub ret: Option<ValueType>,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, ret: Option<ValueType>) -> Self {
        Self { params, ret }
    }

    /// `() -> Void`
    pub fn void() -> Self {
        Self::default()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        match self.ret {
            Some(ret) => write!(f, ") -> {}", ret),
            None => f.write_str(") -> Void"),
        }
    }
}

/// A constant value in a block's constant pool.
#[derive(Debug, Clone)]
pub enum Constant {
    Int(i64),
    Char(u16),
    Float(f32),
    Bool(bool),
    Double(f64),
    /// Message text; never pushed on the operand stack
    Str(String),
}

impl Constant {
    /// The stack type this constant pushes, if it can be pushed at all.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Constant::Int(_) => Some(ValueType::Int),
            Constant::Char(_) => Some(ValueType::Char),
            Constant::Float(_) => Some(ValueType::Float),
            Constant::Bool(_) => Some(ValueType::Bool),
            Constant::Double(_) => Some(ValueType::Double),
            Constant::Str(_) => None,
        }
    }
}

// Floats compare by bit pattern so the pool keeps 0.0 and -0.0 apart.
impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Char(a), Constant::Char(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Char(c) => write!(f, "char {}", c),
            Constant::Float(x) => write!(f, "{:?}f", x),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Double(x) => write!(f, "{:?}", x),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_display() {
        let sig = Signature::new(vec![ValueType::Int, ValueType::Double], Some(ValueType::Bool));
        assert_eq!(sig.to_string(), "(Int, Double) -> Bool");
        assert_eq!(Signature::void().to_string(), "() -> Void");
    }

    #[test]
    fn test_signed_zero_constants_differ() {
        assert_ne!(Constant::Double(0.0), Constant::Double(-0.0));
        assert_eq!(Constant::Double(f64::NAN), Constant::Double(f64::NAN));
        assert_ne!(Constant::Int(1), Constant::Double(1.0));
    }

    #[test]
    fn test_type_byte_round_trip() {
        for ty in [ValueType::Int, ValueType::Char, ValueType::Float, ValueType::Bool, ValueType::Double] {
            assert_eq!(ValueType::try_from(ty as u8), Ok(ty));
        }
        assert_eq!(ValueType::try_from(0), Err(0));
    }
}
