//! Numeric coercion, saturation and the arithmetic/comparison methods.

use serde_json::Value as Json;

use crate::error::DbError;
use crate::types::{Numeric, Value};

use super::query::Method;

/// Working number: integers are widened so intermediate results saturate
/// instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i128),
    Float(f64),
}

impl Num {
    pub(crate) fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Num::Int(*i as i128)),
            Value::Uint(u) => Some(Num::Int(*u as i128)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Saturation and clamping rules for one numeric position.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NumRules {
    Int {
        lo: i128,
        hi: i128,
        /// Declared `[min, max]`, applied when `min < max`
        clamp: Option<(i128, i128)>,
        /// Reject float operands
        ints_only: bool,
        unsigned: bool,
    },
    Float {
        single: bool,
        absolute: bool,
        clamp: Option<(f64, f64)>,
    },
}

impl NumRules {
    pub(crate) fn of(numeric: Numeric<'_>) -> Self {
        match numeric {
            Numeric::Int { spec, lo, hi } => NumRules::Int {
                lo: lo as i128,
                hi: hi as i128,
                clamp: (spec.min < spec.max).then_some((spec.min as i128, spec.max as i128)),
                ints_only: false,
                unsigned: false,
            },
            Numeric::Uint { spec, hi } => NumRules::Int {
                lo: 0,
                hi: hi as i128,
                clamp: (spec.min < spec.max).then_some((spec.min as i128, spec.max as i128)),
                ints_only: false,
                unsigned: true,
            },
            Numeric::Float { spec, single } => NumRules::Float {
                single,
                absolute: spec.absolute,
                clamp: (spec.min < spec.max).then_some((spec.min, spec.max)),
            },
        }
    }

    /// Rules after a `*len` / `*indexOf` projection.
    pub(crate) fn projected_int() -> Self {
        NumRules::Int {
            lo: i64::MIN as i128,
            hi: i64::MAX as i128,
            clamp: None,
            ints_only: true,
            unsigned: false,
        }
    }

    /// Rules after a `*since` / `*until` projection.
    pub(crate) fn projected_float() -> Self {
        NumRules::Float {
            single: false,
            absolute: false,
            clamp: None,
        }
    }

    fn settle_int(&self, v: i128) -> i128 {
        match *self {
            NumRules::Int { lo, hi, clamp, .. } => {
                let v = v.clamp(lo, hi);
                match clamp {
                    Some((min, max)) => v.clamp(min, max),
                    None => v,
                }
            }
            NumRules::Float { .. } => v,
        }
    }

    fn settle_float(&self, v: f64) -> f64 {
        match *self {
            NumRules::Float {
                single,
                absolute,
                clamp,
            } => {
                let mut v = if single {
                    v.clamp(f32::MIN as f64, f32::MAX as f64) as f32 as f64
                } else {
                    v
                };
                if absolute {
                    v = v.abs();
                }
                match clamp {
                    Some((min, max)) => v.clamp(min, max),
                    None => v,
                }
            }
            NumRules::Int { .. } => v,
        }
    }

    /// Coerces a caller-supplied number to this position's canonical form.
    pub(crate) fn coerce(&self, input: &Json, item: &str) -> Result<Num, DbError> {
        let raw = json_num(input).ok_or_else(|| DbError::InvalidItemType {
            item: item.to_string(),
            expected: self.expected(),
        })?;
        Ok(self.settle(raw))
    }

    /// Like [`coerce`](Self::coerce) but yields `None` when the number has
    /// no exact counterpart at this position instead of saturating it.
    pub(crate) fn coerce_exact(&self, input: &Json, item: &str) -> Result<Option<Num>, DbError> {
        let raw =
            json_num(input).ok_or_else(|| DbError::InvalidMethodParameters(item.to_string()))?;
        let exact = match (*self, raw) {
            (NumRules::Int { .. }, Num::Int(i)) => (self.settle_int(i) == i).then_some(Num::Int(i)),
            (NumRules::Int { .. }, Num::Float(f)) => {
                let i = f as i128;
                (f.fract() == 0.0 && self.settle_int(i) == i).then_some(Num::Int(i))
            }
            (NumRules::Float { single, absolute, clamp }, raw) => {
                let f = raw.as_f64();
                let fits = (!single || f.abs() <= f32::MAX as f64)
                    && (!absolute || f >= 0.0)
                    && clamp.is_none_or(|(min, max)| (min..=max).contains(&f));
                fits.then(|| Num::Float(self.settle_float(f)))
            }
        };
        Ok(exact)
    }

    fn settle(&self, raw: Num) -> Num {
        match self {
            NumRules::Int { .. } => Num::Int(self.settle_int(match raw {
                Num::Int(i) => i,
                Num::Float(f) => f.trunc() as i128,
            })),
            NumRules::Float { .. } => Num::Float(self.settle_float(raw.as_f64())),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            NumRules::Int { unsigned: true, .. } => "unsigned integer",
            NumRules::Int { .. } => "integer",
            NumRules::Float { .. } => "float",
        }
    }

    /// Converts a settled number to the stored value for this position.
    pub(crate) fn to_value(&self, n: Num) -> Value {
        match (self, n) {
            (NumRules::Int { unsigned: true, .. }, Num::Int(i)) => {
                Value::Uint(u64::try_from(i).unwrap_or(0))
            }
            (NumRules::Int { .. }, Num::Int(i)) => Value::Int(i64::try_from(i).unwrap_or(0)),
            (_, n) => Value::Float(n.as_f64()),
        }
    }

    /// Applies one arithmetic method with `param` as the right operand.
    pub(crate) fn apply(
        &self,
        method: Method,
        acc: Num,
        param: &Json,
        item: &str,
    ) -> Result<Num, DbError> {
        let operand = self.operand(param, item)?;
        let result = match (self, acc, operand) {
            (NumRules::Int { .. }, Num::Int(a), Num::Int(b)) => Num::Int(int_op(method, a, b, item)?),
            (NumRules::Int { .. }, Num::Int(a), Num::Float(b)) => {
                let r = float_op(method, a as f64, b, item)?;
                Num::Int(r.trunc() as i128)
            }
            (NumRules::Float { .. }, a, b) => Num::Float(float_op(method, a.as_f64(), b.as_f64(), item)?),
            _ => {
                return Err(DbError::Unexpected(format!(
                    "integer rules applied to float value of '{}'",
                    item
                )))
            }
        };
        Ok(self.settle(result))
    }

    /// Evaluates a comparison method against `param`.
    pub(crate) fn compare(
        &self,
        method: Method,
        acc: Num,
        param: &Json,
        item: &str,
    ) -> Result<bool, DbError> {
        let operand = self.operand(param, item)?;
        let ordering = match (acc, operand) {
            (Num::Int(a), Num::Int(b)) => a.partial_cmp(&b),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
        .ok_or_else(|| DbError::InvalidMethodParameters(item.to_string()))?;

        use std::cmp::Ordering::*;
        let result = match method {
            Method::Eq => ordering == Equal,
            Method::Gt => ordering == Greater,
            Method::Lt => ordering == Less,
            Method::Gte => ordering != Less,
            Method::Lte => ordering != Greater,
            _ => {
                return Err(DbError::InvalidMethod {
                    item: item.to_string(),
                    method: method.name(),
                })
            }
        };
        Ok(result)
    }

    fn operand(&self, param: &Json, item: &str) -> Result<Num, DbError> {
        let operand =
            json_num(param).ok_or_else(|| DbError::InvalidMethodParameters(item.to_string()))?;
        if let (NumRules::Int { ints_only: true, .. }, Num::Float(_)) = (self, operand) {
            return Err(DbError::InvalidMethodParameters(item.to_string()));
        }
        Ok(operand)
    }
}

/// Reads a JSON number, keeping integers exact.
fn json_num(input: &Json) -> Option<Num> {
    if let Some(i) = input.as_i64() {
        return Some(Num::Int(i as i128));
    }
    if let Some(u) = input.as_u64() {
        return Some(Num::Int(u as i128));
    }
    input.as_f64().filter(|f| f.is_finite()).map(Num::Float)
}

fn int_op(method: Method, a: i128, b: i128, item: &str) -> Result<i128, DbError> {
    let r = match method {
        Method::Add => a.saturating_add(b),
        Method::Sub => a.saturating_sub(b),
        Method::Mul => a.saturating_mul(b),
        Method::Div | Method::Mod if b == 0 => {
            return Err(DbError::InvalidMethodParameters(item.to_string()))
        }
        Method::Div => a.saturating_div(b),
        Method::Mod => a.checked_rem(b).unwrap_or(0),
        _ => {
            return Err(DbError::InvalidMethod {
                item: item.to_string(),
                method: method.name(),
            })
        }
    };
    Ok(r)
}

fn float_op(method: Method, a: f64, b: f64, item: &str) -> Result<f64, DbError> {
    let r = match method {
        Method::Add => a + b,
        Method::Sub => a - b,
        Method::Mul => a * b,
        Method::Div if b == 0.0 => return Err(DbError::InvalidMethodParameters(item.to_string())),
        Method::Div => a / b,
        Method::Mod => {
            let divisor = (b + 0.5) as i64;
            if divisor == 0 {
                return Err(DbError::InvalidMethodParameters(item.to_string()));
            }
            ((a + 0.5) as i64).checked_rem(divisor).unwrap_or(0) as f64
        }
        _ => {
            return Err(DbError::InvalidMethod {
                item: item.to_string(),
                method: method.name(),
            })
        }
    };
    if !r.is_finite() {
        return Err(DbError::InvalidMethodParameters(item.to_string()));
    }
    Ok(r)
}
