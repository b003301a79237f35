use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Number, Value};

use crate::Result;
use crate::plugin::{MethodError, MethodResult, MethodTable, Params, Plugin, PluginContext};

pub const KIND: &str = "math";

/// Arithmetic over JSON numbers. Integer inputs stay integers where the
/// result is exact.
#[derive(Debug, Default)]
pub struct Math;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MathParams {}

/// # Errors
///
/// Fails if the entry carries any plugin parameters.
pub fn factory(ctx: PluginContext) -> Result<Arc<dyn Plugin>> {
    let MathParams {} = ctx.params()?;
    Ok(Arc::new(Math))
}

impl Plugin for Math {
    fn methods(self: Arc<Self>) -> MethodTable {
        MethodTable::new()
            .sync("add", |p| binary(&p, Num::add))
            .sync("sub", |p| binary(&p, Num::sub))
            .sync("mul", |p| binary(&p, Num::mul))
            .sync("div", |p| binary(&p, Num::div))
            .sync("sum", sum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

// Precision loss on huge integers matches plain float arithmetic; zero check is exact
#[allow(clippy::cast_precision_loss, clippy::float_cmp)]
impl Num {
    fn parse(name: &str, value: &Value) -> std::result::Result<Self, MethodError> {
        if let Some(i) = value.as_i64() {
            return Ok(Self::Int(i));
        }
        value
            .as_f64()
            .map(Self::Float)
            .ok_or_else(|| MethodError::invalid(name, "expected a number"))
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn int_or_float(
        a: Self,
        b: Self,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Self {
        match (a, b) {
            (Self::Int(x), Self::Int(y)) => {
                int_op(x, y).map_or_else(|| Self::Float(float_op(x as f64, y as f64)), Self::Int)
            }
            _ => Self::Float(float_op(a.as_f64(), b.as_f64())),
        }
    }

    fn add(a: Self, b: Self) -> std::result::Result<Self, MethodError> {
        Ok(Self::int_or_float(a, b, i64::checked_add, |x, y| x + y))
    }

    fn sub(a: Self, b: Self) -> std::result::Result<Self, MethodError> {
        Ok(Self::int_or_float(a, b, i64::checked_sub, |x, y| x - y))
    }

    fn mul(a: Self, b: Self) -> std::result::Result<Self, MethodError> {
        Ok(Self::int_or_float(a, b, i64::checked_mul, |x, y| x * y))
    }

    fn div(a: Self, b: Self) -> std::result::Result<Self, MethodError> {
        if b.as_f64() == 0.0 {
            return Err(MethodError::failed("division by zero"));
        }
        let exact = |x: i64, y: i64| {
            if x.checked_rem(y)? == 0 {
                x.checked_div(y)
            } else {
                None
            }
        };
        Ok(Self::int_or_float(a, b, exact, |x, y| x / y))
    }

    fn into_value(self) -> std::result::Result<Value, MethodError> {
        match self {
            Self::Int(i) => Ok(Value::from(i)),
            Self::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| MethodError::failed("result is not a finite number")),
        }
    }
}

fn binary(
    params: &Params,
    op: fn(Num, Num) -> std::result::Result<Num, MethodError>,
) -> MethodResult {
    params.deny_unknown(&["a", "b"])?;
    let a = Num::parse("a", &params.required::<Value>("a")?)?;
    let b = Num::parse("b", &params.required::<Value>("b")?)?;
    op(a, b)?.into_value()
}

fn sum(params: Params) -> MethodResult {
    params.deny_unknown(&["values"])?;
    let values: Vec<Value> = params.required("values")?;
    values
        .iter()
        .try_fold(Num::Int(0), |acc, v| Num::add(acc, Num::parse("values", v)?))?
        .into_value()
}
