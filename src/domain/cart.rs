//! Cart document model shared with the document store
//!
//! The cart is a single small document: an ordered list of line items,
//! unique by barcode, in insertion (commit) order. All mutation helpers
//! preserve the invariants the store relies on: no duplicate barcodes,
//! no zero-quantity lines.

use crate::domain::types::{epoch_ms, Barcode, CatalogKey};
use serde::{Deserialize, Serialize};

/// A catalog product as stored in the products collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub barcode: Barcode,
    pub name: CatalogKey,
    pub price: f64,
}

/// A single line in the cart document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub barcode: Barcode,
    pub name: CatalogKey,
    pub price: f64,
    pub quantity: u32,
    /// Epoch ms of the last quantity change
    pub last_updated: u64,
}

impl CartLineItem {
    /// Create a fresh quantity-1 line for a product
    pub fn for_product(product: &ProductRecord) -> Self {
        Self {
            barcode: product.barcode.clone(),
            name: product.name.clone(),
            price: product.price,
            quantity: 1,
            last_updated: epoch_ms(),
        }
    }
}

/// The shared cart document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartDocument {
    #[serde(default)]
    pub items: Vec<CartLineItem>,
}

/// What a cart mutation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartChange {
    /// A new line item was appended
    Appended,
    /// An existing line item's quantity was incremented
    Incremented,
}

impl CartDocument {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Find a line item by barcode
    pub fn find(&self, barcode: &Barcode) -> Option<&CartLineItem> {
        self.items.iter().find(|item| &item.barcode == barcode)
    }

    fn find_mut(&mut self, barcode: &Barcode) -> Option<&mut CartLineItem> {
        self.items.iter_mut().find(|item| &item.barcode == barcode)
    }

    /// Add a product: increment its line if present, else append a new line.
    /// Barcode uniqueness holds by construction.
    pub fn apply_add(&mut self, product: &ProductRecord) -> CartChange {
        if let Some(item) = self.find_mut(&product.barcode) {
            item.quantity += 1;
            item.last_updated = epoch_ms();
            return CartChange::Incremented;
        }
        self.items.push(CartLineItem::for_product(product));
        CartChange::Appended
    }

    /// Adjust a line's quantity by a signed delta.
    ///
    /// A quantity that would drop below 1 removes the line entirely; the
    /// cart never retains a zero-quantity line. Returns false if no line
    /// with that barcode exists.
    pub fn adjust_quantity(&mut self, barcode: &Barcode, delta: i64) -> bool {
        let Some(idx) = self.items.iter().position(|item| &item.barcode == barcode) else {
            return false;
        };

        let new_qty = self.items[idx].quantity as i64 + delta;
        if new_qty >= 1 {
            self.items[idx].quantity = new_qty as u32;
            self.items[idx].last_updated = epoch_ms();
        } else {
            self.items.remove(idx);
        }
        true
    }

    /// Remove all items (checkout / explicit clear)
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Total price across all lines
    pub fn total(&self) -> f64 {
        self.items.iter().map(|item| item.price * item.quantity as f64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
