//! Entity types mirrored by the cache.
//!
//! Field names follow the server's camelCase documents. Every field has a
//! default and unknown fields are ignored, so additive server changes never
//! make a record undecodable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use salecache_common::CollectionName;
use salecache_sync::SyncEntity;

/// An entity type bound to one collection.
pub trait Entity: SyncEntity {
    /// Collection holding this type.
    const COLLECTION: CollectionName;

    /// Order used when listing the collection.
    fn list_order(a: &Self, b: &Self) -> Ordering;
}

/// A buyer or a producer.
pub trait Party: Entity {
    fn code(&self) -> &str;
    fn company_name(&self) -> &str;
    fn vat_number(&self) -> &str;
    fn status(&self) -> PartyStatus;
}

/// Lifecycle of a sale document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    #[default]
    Draft,
    Confirmed,
    Invoiced,
    Paid,
    Cancelled,
}

impl SaleStatus {
    /// Confirmed or invoiced but not yet paid.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, SaleStatus::Confirmed | SaleStatus::Invoiced)
    }
}

/// Whether a buyer or producer is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyStatus {
    #[default]
    Active,
    Inactive,
}

/// A sale (invoice, proforma, credit note, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Sale {
    pub sale_id: String,
    pub sale_number: u64,
    /// Registration date, `YYYY-MM-DD`.
    pub sale_date: String,
    /// Fiscal year the sale is filed under.
    pub year: Option<i32>,
    pub doc_type: String,
    pub buyer_id: String,
    pub buyer_name: String,
    pub buyer_vat_number: String,
    pub producer_id: String,
    pub producer_name: String,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub payment_method: String,
    pub currency: String,
    pub status: SaleStatus,
    pub invoice_generated: bool,
    pub invoice_number: Option<String>,
    pub reference_number: String,
    pub notes: String,
    pub lines_count: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Sale {
    fn default() -> Self {
        Self {
            sale_id: String::new(),
            sale_number: 0,
            sale_date: String::new(),
            year: None,
            doc_type: String::new(),
            buyer_id: String::new(),
            buyer_name: String::new(),
            buyer_vat_number: String::new(),
            producer_id: String::new(),
            producer_name: String::new(),
            subtotal: 0.0,
            tax_amount: 0.0,
            total: 0.0,
            payment_method: String::new(),
            currency: "EUR".to_string(),
            status: SaleStatus::Draft,
            invoice_generated: false,
            invoice_number: None,
            reference_number: String::new(),
            notes: String::new(),
            lines_count: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Sale {
    /// Fiscal year of the sale, falling back to the year of its date.
    pub fn year(&self) -> Option<i32> {
        self.year
            .or_else(|| self.sale_date.get(..4).and_then(|y| y.parse().ok()))
    }
}

impl Entity for Sale {
    const COLLECTION: CollectionName = CollectionName::Sales;

    /// Newest first, then by number descending.
    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.sale_date
            .cmp(&a.sale_date)
            .then_with(|| b.sale_number.cmp(&a.sale_number))
    }
}

/// A customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Buyer {
    pub buyer_id: String,
    pub code: String,
    pub company_name: String,
    pub vat_number: String,
    pub fiscal_code: String,
    pub address: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
    pub email: String,
    pub phone: String,
    /// Certified e-mail address.
    pub pec: String,
    /// E-invoicing recipient code.
    pub sdi: String,
    pub default_payment_terms: String,
    pub currency: String,
    pub status: PartyStatus,
    pub total_sales: u64,
    pub total_revenue: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Buyer {
    fn default() -> Self {
        Self {
            buyer_id: String::new(),
            code: String::new(),
            company_name: String::new(),
            vat_number: String::new(),
            fiscal_code: String::new(),
            address: String::new(),
            city: String::new(),
            province: String::new(),
            postal_code: String::new(),
            country: "IT".to_string(),
            email: String::new(),
            phone: String::new(),
            pec: String::new(),
            sdi: String::new(),
            default_payment_terms: String::new(),
            currency: "EUR".to_string(),
            status: PartyStatus::Active,
            total_sales: 0,
            total_revenue: 0.0,
            created_at: None,
            updated_at: None,
        }
    }
}

/// A supplier whose goods are sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Producer {
    pub producer_id: String,
    pub code: String,
    pub company_name: String,
    pub vat_number: String,
    pub fiscal_code: String,
    pub address: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
    pub email: String,
    pub phone: String,
    pub status: PartyStatus,
    pub total_sales: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Producer {
    fn default() -> Self {
        Self {
            producer_id: String::new(),
            code: String::new(),
            company_name: String::new(),
            vat_number: String::new(),
            fiscal_code: String::new(),
            address: String::new(),
            city: String::new(),
            province: String::new(),
            postal_code: String::new(),
            country: "IT".to_string(),
            email: String::new(),
            phone: String::new(),
            status: PartyStatus::Active,
            total_sales: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

fn by_company_name(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

impl Entity for Buyer {
    const COLLECTION: CollectionName = CollectionName::Buyers;

    fn list_order(a: &Self, b: &Self) -> Ordering {
        by_company_name(&a.company_name, &b.company_name).then_with(|| a.code.cmp(&b.code))
    }
}

impl Entity for Producer {
    const COLLECTION: CollectionName = CollectionName::Producers;

    fn list_order(a: &Self, b: &Self) -> Ordering {
        by_company_name(&a.company_name, &b.company_name).then_with(|| a.code.cmp(&b.code))
    }
}

impl Party for Buyer {
    fn code(&self) -> &str {
        &self.code
    }
    fn company_name(&self) -> &str {
        &self.company_name
    }
    fn vat_number(&self) -> &str {
        &self.vat_number
    }
    fn status(&self) -> PartyStatus {
        self.status
    }
}

impl Party for Producer {
    fn code(&self) -> &str {
        &self.code
    }
    fn company_name(&self) -> &str {
        &self.company_name
    }
    fn vat_number(&self) -> &str {
        &self.vat_number
    }
    fn status(&self) -> PartyStatus {
        self.status
    }
}
