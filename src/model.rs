//! Shared value types used across the entity modules.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{AppError, AppResult};

/// Declares a closed string enum with stable wire/storage names.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::AppError;

            fn from_str(raw: &str) -> $crate::AppResult<Self> {
                match raw {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::AppError::validation(
                        concat!("ENUM/", stringify!($name)),
                        format!("Unknown {} value", stringify!($name)),
                    )
                    .with_context("value", other.to_string())),
                }
            }
        }
    };
}

pub(crate) use string_enum;

string_enum!(
    /// Contact priority. Drives follow-up cadence.
    Tier { A => "A", B => "B", C => "C", D => "D" }
);

string_enum!(RelationshipType {
    Customer => "customer",
    Partner => "partner",
    Investor => "investor",
    Vendor => "vendor",
    Other => "other",
});

string_enum!(InteractionType {
    Meeting => "meeting",
    Call => "call",
    Email => "email",
    Message => "message",
    Event => "event",
    Other => "other",
});

string_enum!(CustomFieldType {
    Text => "text",
    Url => "url",
    Number => "number",
    Date => "date",
    Textarea => "textarea",
    Phone => "phone",
});

string_enum!(FieldCategory {
    Social => "social",
    Personal => "personal",
    Work => "work",
    Other => "other",
});

impl Tier {
    /// Days without contact after which a follow-up is due. `None` for tiers
    /// that never need one.
    pub fn follow_up_threshold_days(self) -> Option<i64> {
        match self {
            Tier::A => Some(14),
            Tier::B => Some(30),
            Tier::C | Tier::D => None,
        }
    }
}

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(https?://)?[a-z0-9][a-z0-9.-]*\.[a-z]{2,}(/\S*)?$").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9 ().-]{6,20}$").unwrap());

/// A custom field value, typed by its definition.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomFieldValue {
    Text(String),
    Url(String),
    Number(f64),
    Date(NaiveDate),
    Textarea(String),
    Phone(String),
}

impl CustomFieldValue {
    /// Validates raw input against `kind`.
    pub fn parse(kind: CustomFieldType, raw: &str) -> AppResult<Self> {
        let invalid = |reason: &str| {
            AppError::validation("CUSTOM_FIELD", format!("Invalid {kind} value"))
                .with_context("reason", reason.to_string())
        };
        match kind {
            CustomFieldType::Text => {
                if raw.contains('\n') {
                    return Err(invalid("text fields are single-line"));
                }
                Ok(CustomFieldValue::Text(raw.trim().to_string()))
            }
            CustomFieldType::Textarea => Ok(CustomFieldValue::Textarea(raw.to_string())),
            CustomFieldType::Url => {
                let trimmed = raw.trim();
                if URL_RE.is_match(trimmed) {
                    Ok(CustomFieldValue::Url(trimmed.to_string()))
                } else {
                    Err(invalid("not a URL"))
                }
            }
            CustomFieldType::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(CustomFieldValue::Number)
                .ok_or_else(|| invalid("not a number")),
            CustomFieldType::Date => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(CustomFieldValue::Date)
                .map_err(|_| invalid("expected YYYY-MM-DD")),
            CustomFieldType::Phone => {
                let trimmed = raw.trim();
                if PHONE_RE.is_match(trimmed) {
                    Ok(CustomFieldValue::Phone(trimmed.to_string()))
                } else {
                    Err(invalid("not a phone number"))
                }
            }
        }
    }

    pub fn kind(&self) -> CustomFieldType {
        match self {
            CustomFieldValue::Text(_) => CustomFieldType::Text,
            CustomFieldValue::Url(_) => CustomFieldType::Url,
            CustomFieldValue::Number(_) => CustomFieldType::Number,
            CustomFieldValue::Date(_) => CustomFieldType::Date,
            CustomFieldValue::Textarea(_) => CustomFieldType::Textarea,
            CustomFieldValue::Phone(_) => CustomFieldType::Phone,
        }
    }

    /// Storage/backup form. Contacts keep custom values as plain strings.
    pub fn render(&self) -> String {
        match self {
            CustomFieldValue::Text(s)
            | CustomFieldValue::Url(s)
            | CustomFieldValue::Textarea(s)
            | CustomFieldValue::Phone(s) => s.clone(),
            CustomFieldValue::Number(n) => n.to_string(),
            CustomFieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Link target for values that have one.
    pub fn href(&self) -> Option<String> {
        match self {
            CustomFieldValue::Url(url) if url.contains("://") => Some(url.clone()),
            CustomFieldValue::Url(url) => Some(format!("https://{url}")),
            CustomFieldValue::Phone(phone) => Some(format!("tel:{}", phone.replace(' ', ""))),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CustomFieldValue::Number(_) | CustomFieldValue::Date(_) => false,
            other => other.render().trim().is_empty(),
        }
    }
}

/// Trims and drops empty optional text so blank inputs are stored as absent.
pub fn clean_opt(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn require_text(field: &'static str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::validation("REQUIRED", format!("{field} is required"))
            .with_context("field", field))
    } else {
        Ok(trimmed.to_string())
    }
}
