use std::fmt;

/// A tagged machine word.
///
/// Fixnums are stored shifted left by one with the low bit set, so every
/// fixnum is odd. The remaining special constants are small even words that
/// can never be mistaken for an aligned heap pointer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const FALSE: Value = Value(0x00);
    pub const NIL: Value = Value(0x08);
    pub const TRUE: Value = Value(0x14);

    /// Largest integer representable as a fixnum.
    pub const FIXNUM_MAX: i64 = i64::MAX >> 1;
    /// Smallest integer representable as a fixnum.
    pub const FIXNUM_MIN: i64 = i64::MIN >> 1;

    /// Tag an integer. Bits above the fixnum range are discarded.
    pub const fn fixnum(n: i64) -> Value {
        Value(((n as u64) << 1) | 1)
    }

    /// Tag an integer, or `None` when it does not fit in a fixnum.
    pub fn try_fixnum(n: i64) -> Option<Value> {
        if (Self::FIXNUM_MIN..=Self::FIXNUM_MAX).contains(&n) {
            Some(Self::fixnum(n))
        } else {
            None
        }
    }

    pub const fn from_bool(b: bool) -> Value {
        if b { Value::TRUE } else { Value::FALSE }
    }

    pub const fn from_raw(raw: u64) -> Value {
        Value(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_fixnum(self) -> bool {
        self.0 & 1 == 1
    }

    pub fn is_nil(self) -> bool {
        self == Value::NIL
    }

    pub fn as_fixnum(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(self) -> bool {
        self != Value::NIL && self != Value::FALSE
    }

    /// Add two fixnums without untagging: `(2a+1) + (2b+1) - 1 = 2(a+b)+1`.
    pub fn tagged_add(self, rhs: Value) -> Value {
        Value(self.0.wrapping_add(rhs.0).wrapping_sub(1))
    }

    /// Subtract two fixnums without untagging: `(2a+1) - (2b+1) + 1 = 2(a-b)+1`.
    pub fn tagged_sub(self, rhs: Value) -> Value {
        Value(self.0.wrapping_sub(rhs.0).wrapping_add(1))
    }

    /// Signed comparison of the raw words. For fixnums this agrees with the
    /// comparison of the untagged integers.
    pub fn tagged_lt(self, rhs: Value) -> Value {
        Value::from_bool((self.0 as i64) < (rhs.0 as i64))
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Value::NIL => "nil",
            Value::TRUE => "true",
            Value::FALSE => "false",
            v if v.is_fixnum() => "fixnum",
            _ => "object",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_fixnum() {
            Some(n) => write!(f, "Fixnum({})", n),
            None => match *self {
                Value::NIL => write!(f, "Nil"),
                Value::TRUE => write!(f, "True"),
                Value::FALSE => write!(f, "False"),
                Value(raw) => write!(f, "Value(0x{:x})", raw),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_fixnum() {
            Some(n) => write!(f, "{}", n),
            None => match *self {
                Value::NIL => write!(f, "nil"),
                Value::TRUE => write!(f, "true"),
                Value::FALSE => write!(f, "false"),
                Value(raw) => write!(f, "#<0x{:x}>", raw),
            },
        }
    }
}
