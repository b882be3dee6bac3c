//! Response body parsers, one per [`ResponseFormat`].

use serde_json::Value;

use crate::error::FetchFailure;
use crate::types::ResponseFormat;

/// Body fields shared by every response shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBody {
    /// `None` when the body carried no errcode at all (treated as success).
    pub errcode: Option<i64>,
    pub lat: String,
    pub lon: String,
    pub radius: String,
    pub address: String,
}

impl ResponseFormat {
    /// Parse a response body into its errcode and location fields.
    pub fn parse(self, body: &str) -> Result<ParsedBody, FetchFailure> {
        match self {
            Self::Json => parse_json(body),
            Self::Delimited => parse_delimited(body),
        }
    }
}

fn malformed(reason: impl Into<String>) -> FetchFailure {
    FetchFailure::Format {
        reason: reason.into(),
    }
}

fn parse_json(body: &str) -> Result<ParsedBody, FetchFailure> {
    let value: Value =
        serde_json::from_str(body.trim()).map_err(|err| malformed(format!("invalid json: {err}")))?;
    let Value::Object(map) = value else {
        return Err(malformed("json body is not an object"));
    };

    let errcode = match map.get("errcode") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(
            n.as_i64()
                .ok_or_else(|| malformed(format!("errcode {n} is not an integer")))?,
        ),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<i64>()
                .map_err(|_| malformed(format!("errcode `{s}` is not an integer")))?,
        ),
        Some(other) => return Err(malformed(format!("unexpected errcode {other}"))),
    };

    let text = |key: &str| match map.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    Ok(ParsedBody {
        errcode,
        lat: text("lat"),
        lon: text("lon"),
        radius: text("radius"),
        address: text("address"),
    })
}

fn parse_delimited(body: &str) -> Result<ParsedBody, FetchFailure> {
    let line = body.trim();
    // The address is last so it may keep its own commas.
    let mut parts = line.splitn(5, ',');
    let code = parts.next().unwrap_or_default().trim();
    let errcode = code
        .parse::<i64>()
        .map_err(|_| malformed(format!("errcode `{code}` is not an integer")))?;

    let rest: Vec<&str> = parts.collect();
    if errcode == 0 && rest.len() < 4 {
        return Err(malformed(format!(
            "expected errcode,lat,lon,radius,address but got {} fields",
            rest.len() + 1
        )));
    }
    let field = |idx: usize| rest.get(idx).map(|s| s.trim().to_string()).unwrap_or_default();

    Ok(ParsedBody {
        errcode: Some(errcode),
        lat: field(0),
        lon: field(1),
        radius: field(2),
        address: field(3),
    })
}
