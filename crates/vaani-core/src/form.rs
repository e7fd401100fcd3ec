//! The collected form: three free-text fields filled by voice, document or hand.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three fields the assistant is allowed to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormField {
    #[serde(rename = "fullName")]
    FullName,
    #[serde(rename = "dob")]
    Dob,
    #[serde(rename = "city")]
    City,
}

impl FormField {
    pub const ALL: [FormField; 3] = [FormField::FullName, FormField::Dob, FormField::City];

    /// Wire name used by the remote model and the HTTP surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            FormField::FullName => "fullName",
            FormField::Dob => "dob",
            FormField::City => "city",
        }
    }

    /// Hindi label used when reading the form back.
    pub fn hindi_label(&self) -> &'static str {
        match self {
            FormField::FullName => "नाम",
            FormField::Dob => "जन्म तिथि",
            FormField::City => "शहर",
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormField {
    type Err = CoreError;

    /// Exact, case-sensitive match against the wire names only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fullName" => Ok(FormField::FullName),
            "dob" => Ok(FormField::Dob),
            "city" => Ok(FormField::City),
            other => Err(CoreError::UnknownField(other.to_string())),
        }
    }
}

/// Collected form values. Values are never validated; any string is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormData {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub dob: String,
    #[serde(default)]
    pub city: String,
}

impl FormData {
    pub fn new(
        full_name: impl Into<String>,
        dob: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            dob: dob.into(),
            city: city.into(),
        }
    }

    pub fn get(&self, field: FormField) -> &str {
        match field {
            FormField::FullName => &self.full_name,
            FormField::Dob => &self.dob,
            FormField::City => &self.city,
        }
    }

    /// Overwrite one field unconditionally.
    pub fn set(&mut self, field: FormField, value: impl Into<String>) {
        let value = value.into();
        match field {
            FormField::FullName => self.full_name = value,
            FormField::Dob => self.dob = value,
            FormField::City => self.city = value,
        }
    }

    /// True when every field is non-empty after trimming whitespace.
    pub fn is_complete(&self) -> bool {
        FormField::ALL
            .iter()
            .all(|f| !self.get(*f).trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        FormField::ALL.iter().all(|f| self.get(*f).trim().is_empty())
    }

    pub fn clear(&mut self) {
        *self = FormData::default();
    }

    /// One-line summary stored alongside a submission.
    pub fn summary(&self) -> String {
        FormField::ALL
            .iter()
            .map(|f| format!("{}: {}", f.hindi_label(), self.get(*f).trim()))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
