//! Value Objects for the order engine

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Round a monetary amount to two decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Normalized identity of a product variant.
///
/// Color is lowercased, size uppercased and gender title-cased, so the same
/// variant resolves identically from carts, checkout requests and the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantKey {
    color: String,
    size: String,
    gender: Option<String>,
}

impl VariantKey {
    pub fn new(color: &str, size: &str, gender: Option<&str>) -> Self {
        Self {
            color: normalize_color(color),
            size: normalize_size(size),
            gender: gender.map(normalize_gender).filter(|g| !g.is_empty()),
        }
    }

    pub fn color(&self) -> &str { &self.color }
    pub fn size(&self) -> &str { &self.size }
    pub fn gender(&self) -> Option<&str> { self.gender.as_deref() }

    /// Whether a catalog variant with key `other` satisfies this lookup key.
    /// A lookup without gender accepts any gender.
    pub fn accepts(&self, other: &VariantKey) -> bool {
        self.color == other.color
            && self.size == other.size
            && match (&self.gender, &other.gender) {
                (None, _) => true,
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
            }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.gender {
            Some(g) => write!(f, "{}/{}/{}", self.color, self.size, g),
            None => write!(f, "{}/{}", self.color, self.size),
        }
    }
}

/// Optional variant attributes as they arrive from a cart line or request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSelection {
    pub color: Option<String>,
    pub size: Option<String>,
    pub gender: Option<String>,
}

impl VariantSelection {
    pub fn new(color: Option<&str>, size: Option<&str>, gender: Option<&str>) -> Self {
        Self {
            color: color.map(str::to_owned),
            size: size.map(str::to_owned),
            gender: gender.map(str::to_owned),
        }
    }

    /// The variant key, when both color and size were given.
    pub fn key(&self) -> Option<VariantKey> {
        let color = self.color.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        let size = self.size.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(VariantKey::new(color, size, self.gender.as_deref()))
    }

    /// No attribute was given, so the line is bought at product level.
    pub fn is_blank(&self) -> bool {
        [&self.color, &self.size, &self.gender].iter().all(|a| a.as_deref().map_or(true, |v| v.trim().is_empty()))
    }
}

impl fmt::Display for VariantSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |a: &Option<String>| a.as_deref().map(str::trim).filter(|v| !v.is_empty()).unwrap_or("?").to_string();
        write!(f, "{}/{}", part(&self.color), part(&self.size))?;
        match self.gender.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            Some(g) => write!(f, "/{}", g),
            None => Ok(()),
        }
    }
}

pub fn normalize_color(color: &str) -> String { color.trim().to_lowercase() }

pub fn normalize_size(size: &str) -> String { size.trim().to_uppercase() }

pub fn normalize_gender(gender: &str) -> String {
    let lower = gender.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
