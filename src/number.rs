// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::cmp::Ordering;
use core::fmt::{self, Debug, Formatter};
use core::str::FromStr;

use anyhow::{bail, Result};
use serde::ser::Serializer;
use serde::Serialize;

const F64_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

#[derive(Clone, Copy)]
pub enum Number {
    UInt(u64),
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_i128(value: i128) -> Option<Self> {
        if value >= 0 {
            u64::try_from(value).ok().map(Number::UInt)
        } else {
            i64::try_from(value).ok().map(Number::Int)
        }
    }

    fn as_i128_exact(&self) -> Option<i128> {
        match self {
            Number::UInt(u) => Some(*u as i128),
            Number::Int(i) => Some(*i as i128),
            Number::Float(f) if f.fract() == 0.0 && f.abs() <= F64_SAFE_INTEGER => {
                Some(*f as i128)
            }
            Number::Float(_) => None,
        }
    }

    fn to_f64_lossy(&self) -> f64 {
        match self {
            Number::UInt(u) => *u as f64,
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.as_i128_exact() {
            Some(i) => u64::try_from(i).ok(),
            None => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.as_i128_exact() {
            Some(i) => i64::try_from(i).ok(),
            None => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.to_f64_lossy()
    }

    pub fn is_integer(&self) -> bool {
        self.as_i128_exact().is_some()
    }

    fn checked_int_op(
        &self,
        rhs: &Self,
        op: fn(i128, i128) -> Option<i128>,
        fop: fn(f64, f64) -> f64,
    ) -> Number {
        if let (Number::UInt(_) | Number::Int(_), Number::UInt(_) | Number::Int(_)) = (self, rhs) {
            if let (Some(a), Some(b)) = (self.as_i128_exact(), rhs.as_i128_exact()) {
                if let Some(n) = op(a, b).and_then(Number::from_i128) {
                    return n;
                }
            }
        }
        Number::from(fop(self.to_f64_lossy(), rhs.to_f64_lossy()))
    }

    pub fn add(&self, rhs: &Self) -> Number {
        self.checked_int_op(rhs, i128::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Self) -> Number {
        self.checked_int_op(rhs, i128::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Self) -> Number {
        self.checked_int_op(rhs, i128::checked_mul, |a, b| a * b)
    }

    pub fn divide(&self, rhs: &Self) -> Result<Number> {
        if rhs.to_f64_lossy() == 0.0 {
            bail!("divide by zero");
        }
        if let (Some(a), Some(b)) = (self.as_i128_exact(), rhs.as_i128_exact()) {
            if a % b == 0 {
                if let Some(n) = Number::from_i128(a / b) {
                    return Ok(n);
                }
            }
        }
        Ok(Number::from(self.to_f64_lossy() / rhs.to_f64_lossy()))
    }
}

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Number::UInt(u) => u.fmt(f),
            Number::Int(i) => i.fmt(f),
            Number::Float(v) => v.fmt(f),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Number::UInt(u) => serializer.serialize_u64(*u),
            Number::Int(i) => serializer.serialize_i64(*i),
            Number::Float(f) => serializer.serialize_f64(*f),
        }
    }
}

impl From<u64> for Number {
    fn from(n: u64) -> Self {
        Number::UInt(n)
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        Number::UInt(n as u64)
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        if n >= 0 {
            Number::UInt(n as u64)
        } else {
            Number::Int(n)
        }
    }
}

impl From<f64> for Number {
    fn from(n: f64) -> Self {
        if n.fract() == 0.0 && n.abs() <= F64_SAFE_INTEGER {
            if n >= 0.0 {
                return Number::UInt(n as u64);
            }
            return Number::Int(n as i64);
        }
        Number::Float(n)
    }
}

impl FromStr for Number {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(u) = u64::from_str(s) {
            return Ok(Number::UInt(u));
        }
        if let Ok(i) = i64::from_str(s) {
            return Ok(Number::Int(i));
        }
        match f64::from_str(s) {
            Ok(f) if f.is_finite() => Ok(Number::Float(f)),
            _ => bail!("invalid number `{s}`"),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_i128_exact(), other.as_i128_exact()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.to_f64_lossy().total_cmp(&other.to_f64_lossy()),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
