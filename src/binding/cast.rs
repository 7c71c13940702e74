use crate::template::TypeTag;
use crate::types::RowValues;

impl TypeTag {
    /// Convert a scalar to the tagged kind.
    ///
    /// `Null` passes through every cast. `List` is checked by the resolver, not here;
    /// a scalar reaching `cast` with `TypeTag::List` is returned unchanged.
    ///
    /// # Errors
    /// Returns a description of the rejected value.
    pub fn cast(self, value: RowValues) -> Result<RowValues, String> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            TypeTag::String => to_text(value),
            TypeTag::Integer => to_integer(value).map(RowValues::Int),
            TypeTag::Unsigned => to_unsigned(value).map(RowValues::Int),
            TypeTag::Float => to_float(value).map(RowValues::Float),
            TypeTag::Boolean => to_boolean(value).map(RowValues::Bool),
            TypeTag::List => Ok(value),
        }
    }
}

fn rejected(value: &RowValues, target: &str) -> String {
    format!("cannot convert {} value {value:?} to {target}", value.type_name())
}

fn to_text(value: RowValues) -> Result<RowValues, String> {
    let text = match value {
        RowValues::Text(s) => s,
        RowValues::Int(i) => i.to_string(),
        RowValues::Float(f) => f.to_string(),
        RowValues::Bool(b) => b.to_string(),
        RowValues::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        RowValues::JSON(json) => json.to_string(),
        other => return Err(rejected(&other, "string")),
    };
    Ok(RowValues::Text(text))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn to_integer(value: RowValues) -> Result<i64, String> {
    match value {
        RowValues::Int(i) => Ok(i),
        RowValues::Bool(b) => Ok(i64::from(b)),
        RowValues::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        RowValues::Text(ref s) => s.trim().parse::<i64>().map_err(|_| rejected(&value, "integer")),
        other => Err(rejected(&other, "integer")),
    }
}

fn to_unsigned(value: RowValues) -> Result<i64, String> {
    let shown = value.clone();
    let int = to_integer(value).map_err(|_| rejected(&shown, "unsigned integer"))?;
    if int < 0 {
        return Err(format!("negative value {int} for unsigned integer"));
    }
    Ok(int)
}

#[allow(clippy::cast_precision_loss)]
fn to_float(value: RowValues) -> Result<f64, String> {
    match value {
        RowValues::Float(f) => Ok(f),
        RowValues::Int(i) => Ok(i as f64),
        RowValues::Text(ref s) => s.trim().parse::<f64>().map_err(|_| rejected(&value, "float")),
        other => Err(rejected(&other, "float")),
    }
}

fn to_boolean(value: RowValues) -> Result<bool, String> {
    match value {
        RowValues::Bool(b) => Ok(b),
        RowValues::Int(0) => Ok(false),
        RowValues::Int(1) => Ok(true),
        RowValues::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(rejected(&value, "boolean")),
        },
        other => Err(rejected(&other, "boolean")),
    }
}
