//! `Value` <-> on-disk encoding.
//!
//! Properties are stored as a single UTF-8 JSON text column per row
//! (`nodes.properties` / `relationships.properties`). Temporal and spatial
//! logical types have no native JSON representation, so they round-trip as
//! tagged string forms: `"@date:2024-01-01"`, `"@point:{...}"`, etc. The tag
//! prefix is chosen to keep collisions rare, though user strings that
//! happen to start with `@date:` would still misround-trip.

use grafito_model::{Duration, Point, PropertyMap, Result, Value};
use serde_json::{Map as JsonMap, Number, Value as Json};

const DATE_TAG: &str = "@date:";
const TIME_TAG: &str = "@time:";
const LOCAL_TIME_TAG: &str = "@localtime:";
const DATETIME_TAG: &str = "@datetime:";
const LOCAL_DATETIME_TAG: &str = "@localdatetime:";
const DURATION_TAG: &str = "@duration:";
const POINT_TAG: &str = "@point:";

pub fn encode_properties(props: &PropertyMap) -> Result<String> {
    let json = value_to_json(&Value::Map(props.clone()));
    Ok(serde_json::to_string(&json)?)
}

pub fn decode_properties(text: &str) -> Result<PropertyMap> {
    let json: Json = serde_json::from_str(text)?;
    match json_to_value(json) {
        Value::Map(m) => Ok(m),
        _ => Ok(PropertyMap::new()),
    }
}

pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(m) => {
            let mut obj = JsonMap::new();
            for (k, v) in m.iter() {
                obj.insert(k.to_string(), value_to_json(v));
            }
            Json::Object(obj)
        }
        Value::Date(d) => Json::String(format!("{DATE_TAG}{d}")),
        Value::Time(t) => Json::String(format!("{TIME_TAG}{t}")),
        Value::LocalTime(t) => Json::String(format!("{LOCAL_TIME_TAG}{t}")),
        Value::DateTime(dt) => Json::String(format!("{DATETIME_TAG}{dt}")),
        Value::LocalDateTime(dt) => Json::String(format!("{LOCAL_DATETIME_TAG}{dt}")),
        Value::Duration(d) => Json::String(format!(
            "{DURATION_TAG}{}:{}:{}:{}",
            d.months, d.days, d.seconds, d.nanos
        )),
        Value::Point(p) => Json::String(format!(
            "{POINT_TAG}{}:{}:{}:{}",
            p.x,
            p.y,
            p.z.map(|z| z.to_string()).unwrap_or_default(),
            p.geographic
        )),
    }
}

pub fn json_to_value(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => decode_tagged_string(&s),
        Json::Array(items) => Value::List(items.into_iter().map(json_to_value).collect()),
        Json::Object(obj) => {
            let mut map = PropertyMap::new();
            for (k, v) in obj {
                map.set(k, json_to_value(v));
            }
            Value::Map(map)
        }
    }
}

fn decode_tagged_string(s: &str) -> Value {
    if let Some(rest) = s.strip_prefix(DATE_TAG) {
        if let Ok(d) = rest.parse() {
            return Value::Date(d);
        }
    } else if let Some(rest) = s.strip_prefix(LOCAL_DATETIME_TAG) {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(rest, "%Y-%m-%dT%H:%M:%S%.f") {
            return Value::LocalDateTime(dt);
        }
    } else if let Some(rest) = s.strip_prefix(DATETIME_TAG) {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(rest, "%Y-%m-%dT%H:%M:%S%.f") {
            return Value::DateTime(dt);
        }
    } else if let Some(rest) = s.strip_prefix(LOCAL_TIME_TAG) {
        if let Ok(t) = rest.parse() {
            return Value::LocalTime(t);
        }
    } else if let Some(rest) = s.strip_prefix(TIME_TAG) {
        if let Ok(t) = rest.parse() {
            return Value::Time(t);
        }
    } else if let Some(rest) = s.strip_prefix(DURATION_TAG) {
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() == 4 {
            if let (Ok(months), Ok(days), Ok(seconds), Ok(nanos)) = (
                parts[0].parse(),
                parts[1].parse(),
                parts[2].parse(),
                parts[3].parse(),
            ) {
                return Value::Duration(Duration { months, days, seconds, nanos });
            }
        }
    } else if let Some(rest) = s.strip_prefix(POINT_TAG) {
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() == 4 {
            if let (Ok(x), Ok(y), Ok(geographic)) =
                (parts[0].parse(), parts[1].parse(), parts[3].parse())
            {
                let z = parts[2].parse().ok();
                return Value::Point(Point { x, y, z, geographic });
            }
        }
    }
    Value::String(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafito_model::NodeId;

    #[test]
    fn round_trips_scalars() {
        let mut props = PropertyMap::new();
        props.set("name", Value::String("Alice".into()));
        props.set("age", Value::Int(30));
        props.set("score", Value::Float(1.5));
        props.set("active", Value::Bool(true));
        props.set("nickname", Value::Null);

        let encoded = encode_properties(&props).unwrap();
        let decoded = decode_properties(&encoded).unwrap();
        assert_eq!(decoded, props);
        let _ = NodeId(1); // keep grafito_model::NodeId import exercised across crate boundary
    }

    #[test]
    fn round_trips_nested_collections() {
        let mut props = PropertyMap::new();
        props.set(
            "tags",
            Value::List(vec![Value::String("a".into()), Value::String("b".into())]),
        );
        let mut inner = PropertyMap::new();
        inner.set("x", Value::Int(1));
        props.set("meta", Value::Map(inner));

        let encoded = encode_properties(&props).unwrap();
        let decoded = decode_properties(&encoded).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn round_trips_date() {
        let mut props = PropertyMap::new();
        props.set("d", Value::Date("2024-01-01".parse().unwrap()));
        let encoded = encode_properties(&props).unwrap();
        let decoded = decode_properties(&encoded).unwrap();
        assert_eq!(decoded, props);
    }
}
