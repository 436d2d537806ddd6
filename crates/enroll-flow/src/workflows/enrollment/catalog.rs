//! Read-only program catalog.
//!
//! The catalog feeds the program picker and the destructive
//! program-switch operation. Deployments load it from the SIS CSV export;
//! tests and the demo use the static variant.

use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};

use super::domain::ProgramId;

/// One program offered for enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    /// Enrollment fee charged at the payment gate, in cents.
    pub fee_cents: u32,
    /// Whether the apprenticeship track can be chosen for this program.
    pub apprenticeship_available: bool,
}

/// Catalog read interface. Listing is cheap and in-memory once loaded.
pub trait ProgramCatalog: Send + Sync {
    fn list_programs(&self) -> Vec<Program>;

    fn find(&self, id: &ProgramId) -> Option<Program> {
        self.list_programs()
            .into_iter()
            .find(|program| &program.id == id)
    }
}

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticProgramCatalog {
    programs: Vec<Program>,
}

impl StaticProgramCatalog {
    pub fn new(programs: Vec<Program>) -> Self {
        Self { programs }
    }
}

impl ProgramCatalog for StaticProgramCatalog {
    fn list_programs(&self) -> Vec<Program> {
        self.programs.clone()
    }
}

/// Catalog import failure.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("program catalog csv is invalid: {0}")]
    Csv(#[from] csv::Error),
    #[error("program row {row} is missing a code")]
    MissingCode { row: usize },
}

/// Catalog hydrated from the SIS CSV export.
#[derive(Debug, Clone)]
pub struct CsvProgramCatalog {
    programs: Vec<Program>,
}

impl CsvProgramCatalog {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut programs = Vec::new();
        for (index, record) in csv_reader.deserialize::<ProgramRow>().enumerate() {
            let row = record?;
            let Some(code) = row.code else {
                return Err(CatalogError::MissingCode { row: index + 1 });
            };
            programs.push(Program {
                id: ProgramId(code),
                name: row.name.unwrap_or_else(|| "Programme sans nom".to_string()),
                fee_cents: row.fee_cents.unwrap_or(0),
                apprenticeship_available: row
                    .apprenticeship
                    .as_deref()
                    .is_some_and(|value| matches!(value, "yes" | "oui" | "true" | "1")),
            });
        }

        Ok(Self { programs })
    }
}

impl ProgramCatalog for CsvProgramCatalog {
    fn list_programs(&self) -> Vec<Program> {
        self.programs.clone()
    }
}

#[derive(Debug, Deserialize)]
struct ProgramRow {
    #[serde(rename = "Code", default, deserialize_with = "empty_string_as_none")]
    code: Option<String>,
    #[serde(rename = "Name", default, deserialize_with = "empty_string_as_none")]
    name: Option<String>,
    #[serde(rename = "Fee Cents", default)]
    fee_cents: Option<u32>,
    #[serde(
        rename = "Apprenticeship",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    apprenticeship: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
