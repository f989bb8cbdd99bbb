//! Fixed-column CSV rendering for client deliveries.
//!
//! The column order and names are a compatibility contract with client
//! import tooling, not negotiable per delivery.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::lead::Lead;

pub const CSV_COLUMNS: [&str; 7] =
    ["nom", "prenom", "telephone", "email", "departement", "proprietaire_maison", "produit"];

#[derive(Debug, Error)]
pub enum CsvRenderError {
    #[error("csv serialization failed: {0}")]
    Write(#[from] csv::Error),
    #[error("csv buffer flush failed: {0}")]
    Flush(#[from] std::io::Error),
    #[error("csv buffer was not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// One row of the delivery file. Contact name/email fields are blank when
/// the platform never captured them; the importer tolerates that.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvRow {
    pub nom: String,
    pub prenom: String,
    pub telephone: String,
    pub email: String,
    pub departement: String,
    pub produit: String,
}

impl CsvRow {
    /// `produit` is always the order's product code, never the lead's raw
    /// product field: backlog substitutes must be indistinguishable from a
    /// normal lead of the ordered product.
    pub fn from_lead(lead: &Lead, order_product: &str) -> Self {
        Self {
            nom: String::new(),
            prenom: String::new(),
            telephone: lead.phone.clone(),
            email: String::new(),
            departement: lead.department.clone().unwrap_or_default(),
            produit: order_product.to_string(),
        }
    }
}

pub fn render_delivery_csv(
    leads: &[Lead],
    order_product: &str,
) -> Result<String, CsvRenderError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;

    for lead in leads {
        let row = CsvRow::from_lead(lead, order_product);
        writer.write_record([
            row.nom.as_str(),
            row.prenom.as_str(),
            row.telephone.as_str(),
            row.email.as_str(),
            row.departement.as_str(),
            // Literal required by the importer contract.
            "TRUE",
            row.produit.as_str(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|error| CsvRenderError::Flush(error.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn delivery_filename(client_name: &str, product: &str, generated_at: DateTime<Utc>) -> String {
    let slug: String = client_name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("leads_{}_{}_{}.csv", slug.trim_matches('-'), product, generated_at.format("%Y%m%d"))
}
