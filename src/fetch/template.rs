//! URL templates filled from a cell identifier.

use serde::{Deserialize, Serialize};

use crate::constants::SOURCE_FIELDS;
use crate::types::CellIdentifier;

/// A lookup URL with `{mcc}`/`{mnc}`/`{lac}`/`{cid}` placeholders. Bare `{}`
/// placeholders are also accepted and filled in source column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute the identifier. Absent fields become empty strings.
    #[must_use]
    pub fn render(&self, id: &CellIdentifier) -> String {
        let values = id
            .fields()
            .map(|field| field.map(|v| v.to_string()).unwrap_or_default());

        let mut url = self.0.clone();
        for (name, value) in SOURCE_FIELDS.iter().zip(values.iter()) {
            url = url.replace(&format!("{{{name}}}"), value);
        }

        let mut positional = values.iter();
        let mut rendered = String::with_capacity(url.len());
        let mut rest = url.as_str();
        while let Some(idx) = rest.find("{}") {
            rendered.push_str(&rest[..idx]);
            rendered.push_str(positional.next().map_or("", String::as_str));
            rest = &rest[idx + 2..];
        }
        rendered.push_str(rest);
        rendered
    }
}

impl From<&str> for UrlTemplate {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
