// Value conversion between QuickJS and serde_json

use rquickjs::{Array, Ctx, Exception, IntoJs, Object, Type, Value as JsValue};
use serde_json::{Map, Number, Value};

/// Deepest array/object nesting accepted from a script
const MAX_DEPTH: usize = 64;

/// Stands in for a reference back to an enclosing object
const CIRCULAR: &str = "[Circular]";

/// Convert a JavaScript value to JSON.
///
/// Functions, symbols and other non-data values become `null`; error objects
/// become their `"Name: message"` string. Non-finite numbers become the
/// strings JavaScript prints for them. A reference back to an enclosing
/// object becomes `"[Circular]"`, and nesting beyond [`MAX_DEPTH`] raises a
/// `RangeError` in the script.
pub(crate) fn js_to_json(js: &JsValue<'_>) -> rquickjs::Result<Value> {
    to_json(js, &mut Vec::new())
}

fn to_json<'js>(js: &JsValue<'js>, ancestors: &mut Vec<JsValue<'js>>) -> rquickjs::Result<Value> {
    if let Some(exception) = js.as_exception() {
        return Ok(Value::String(describe_exception(exception)));
    }

    let value = match js.type_of() {
        Type::Bool => Value::Bool(js.as_bool().unwrap_or_default()),
        Type::Int => Value::from(js.as_int().unwrap_or_default()),
        Type::Float => float_to_json(js.as_float().unwrap_or(f64::NAN)),
        Type::String => Value::String(js.get::<String>()?),
        Type::Array | Type::Object => {
            if ancestors.iter().any(|ancestor| ancestor == js) {
                return Ok(Value::String(CIRCULAR.to_string()));
            }
            if ancestors.len() >= MAX_DEPTH {
                return Err(Exception::throw_range(
                    js.ctx(),
                    &format!("Value nested deeper than {MAX_DEPTH} levels"),
                ));
            }

            ancestors.push(js.clone());
            let value = container_to_json(js, ancestors);
            ancestors.pop();
            value?
        }
        _ => Value::Null,
    };

    Ok(value)
}

fn container_to_json<'js>(
    js: &JsValue<'js>,
    ancestors: &mut Vec<JsValue<'js>>,
) -> rquickjs::Result<Value> {
    if let Some(array) = js.as_array() {
        let mut values = Vec::with_capacity(array.len());
        for i in 0..array.len() {
            let item: JsValue = array.get(i)?;
            values.push(to_json(&item, ancestors)?);
        }
        return Ok(Value::Array(values));
    }

    let object: Object = js.get()?;
    let mut fields = Map::new();
    for prop in object.props::<String, JsValue>() {
        let (key, val) = prop?;
        fields.insert(key, to_json(&val, ancestors)?);
    }
    Ok(Value::Object(fields))
}

fn float_to_json(f: f64) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None if f.is_nan() => Value::String("NaN".to_string()),
        None if f > 0.0 => Value::String("Infinity".to_string()),
        None => Value::String("-Infinity".to_string()),
    }
}

/// Convert a JSON value to a JavaScript value
pub(crate) fn json_to_js<'js>(ctx: &Ctx<'js>, json: &Value) -> rquickjs::Result<JsValue<'js>> {
    match json {
        Value::Null => Ok(JsValue::new_null(ctx.clone())),
        Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        Value::Number(n) => {
            let int = n.as_i64().and_then(|i| i32::try_from(i).ok());
            match (int, n.as_f64()) {
                (Some(i), _) => Ok(JsValue::new_int(ctx.clone(), i)),
                (None, Some(f)) => Ok(JsValue::new_float(ctx.clone(), f)),
                (None, None) => Ok(JsValue::new_undefined(ctx.clone())),
            }
        }
        Value::String(s) => s.as_str().into_js(ctx),
        Value::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        Value::Object(fields) => {
            let object = Object::new(ctx.clone())?;
            for (key, val) in fields {
                object.set(key.as_str(), json_to_js(ctx, val)?)?;
            }
            Ok(object.into_value())
        }
    }
}

/// Render an error object as `"Name: message"`
pub(crate) fn describe_exception(exception: &Exception<'_>) -> String {
    let message = exception.message().unwrap_or_default();
    let name: Option<String> = exception.get("name").ok();

    match name {
        Some(name) if !name.is_empty() && !message.is_empty() => format!("{name}: {message}"),
        Some(name) if !name.is_empty() => name,
        _ => message,
    }
}

/// Render any thrown value as a diagnostic message
pub(crate) fn describe_thrown(thrown: &JsValue<'_>) -> String {
    if let Some(exception) = thrown.as_exception() {
        return describe_exception(exception);
    }
    if let Some(text) = thrown.as_string() {
        if let Ok(text) = text.to_string() {
            return text;
        }
    }
    match js_to_json(thrown) {
        Ok(Value::Null) | Err(_) => "uncaught exception".to_string(),
        Ok(value) => value.to_string(),
    }
}
