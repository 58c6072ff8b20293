//! Cart Aggregate

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{normalize_color, normalize_size, VariantSelection};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: u32,
    pub color: Option<String>,
    pub size: Option<String>,
    pub gender: Option<String>,
}

impl CartLine {
    pub fn new(product_id: Uuid, quantity: u32) -> Self {
        Self { product_id, quantity, color: None, size: None, gender: None }
    }

    pub fn with_variant(mut self, color: &str, size: &str, gender: Option<&str>) -> Self {
        self.color = Some(color.to_string());
        self.size = Some(size.to_string());
        self.gender = gender.map(str::to_string);
        self
    }

    pub fn selection(&self) -> VariantSelection {
        VariantSelection::new(self.color.as_deref(), self.size.as_deref(), self.gender.as_deref())
    }

    /// Selector that removes this line (and only lines like it) after checkout.
    pub fn selector(&self) -> CartLineSelector {
        CartLineSelector { product_id: self.product_id, color: self.color.clone(), size: self.size.clone() }
    }
}

/// Matches cart lines on product id plus every attribute that is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineSelector {
    pub product_id: Uuid,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl CartLineSelector {
    pub fn matches(&self, line: &CartLine) -> bool {
        if line.product_id != self.product_id { return false; }
        if let Some(color) = &self.color {
            if line.color.as_deref().map(normalize_color) != Some(normalize_color(color)) { return false; }
        }
        if let Some(size) = &self.size {
            if line.size.as_deref().map(normalize_size) != Some(normalize_size(size)) { return false; }
        }
        true
    }
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self { Self { user_id, lines: vec![] } }

    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn add_line(&mut self, line: CartLine) {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.selector() == line.selector() && l.gender == line.gender) {
            existing.quantity = existing.quantity.saturating_add(line.quantity);
        } else {
            self.lines.push(line);
        }
    }

    /// Remove every line matched by any selector; returns how many were removed.
    pub fn remove_matching(&mut self, selectors: &[CartLineSelector]) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| !selectors.iter().any(|s| s.matches(l)));
        before - self.lines.len()
    }
}
