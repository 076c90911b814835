//! Counter rendering styles.

use std::str::FromStr;

use strum::EnumString;
use tracing::warn;

/// How a counter value is rendered into text.
///
/// Styles with a limited domain fall back to `decimal` (with a warning) for
/// out-of-range values, so numbering keeps flowing instead of aborting the
/// bake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum CounterStyle {
    #[default]
    Decimal,
    DecimalLeadingZero,
    LowerRoman,
    UpperRoman,
    #[strum(serialize = "lower-latin", serialize = "lower-alpha")]
    LowerLatin,
    #[strum(serialize = "upper-latin", serialize = "upper-alpha")]
    UpperLatin,
}

impl CounterStyle {
    /// Looks up a style by its CSS name; unknown names warn and render as
    /// decimal.
    pub fn parse(name: &str) -> Self {
        Self::from_str(name).unwrap_or_else(|_| {
            warn!("unknown counter style {name}, using decimal");
            Self::Decimal
        })
    }

    pub fn format(self, value: i64) -> String {
        match self {
            Self::Decimal => value.to_string(),
            Self::DecimalLeadingZero => {
                if (0..10).contains(&value) {
                    format!("0{value}")
                } else {
                    value.to_string()
                }
            }
            Self::LowerRoman => roman(value).unwrap_or_else(|| {
                warn!("counter value {value} out of range for roman, using decimal");
                value.to_string()
            }),
            Self::UpperRoman => roman(value)
                .map(|s| s.to_uppercase())
                .unwrap_or_else(|| {
                    warn!("counter value {value} out of range for roman, using decimal");
                    value.to_string()
                }),
            Self::LowerLatin => latin(value).unwrap_or_else(|| {
                warn!("counter value {value} out of range for latin, using decimal");
                value.to_string()
            }),
            Self::UpperLatin => latin(value)
                .map(|s| s.to_uppercase())
                .unwrap_or_else(|| {
                    warn!("counter value {value} out of range for latin, using decimal");
                    value.to_string()
                }),
        }
    }
}

/// Valid for 1..=4999.
fn roman(value: i64) -> Option<String> {
    if !(1..=4999).contains(&value) {
        return None;
    }
    const NUMERALS: &[(i64, &str)] = &[
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut rest = value;
    let mut out = String::new();
    for &(weight, digits) in NUMERALS {
        while rest >= weight {
            out.push_str(digits);
            rest -= weight;
        }
    }
    Some(out)
}

/// Valid for 1..=26.
fn latin(value: i64) -> Option<String> {
    if !(1..=26).contains(&value) {
        return None;
    }
    let letter = char::from(b'a' + u8::try_from(value - 1).expect("value is in 1..=26"));
    Some(letter.to_string())
}
