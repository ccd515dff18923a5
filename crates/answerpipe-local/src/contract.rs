//! Structural contracts per entity class.
//!
//! A contract lists literal markers a final answer must mention. The table is static and
//! selected once per request via [`EntityClass::contract`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Education,
    Company,
    Generic,
}

impl EntityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Education => "education",
            Self::Company => "company",
            Self::Generic => "generic",
        }
    }

    pub fn contract(self) -> &'static ContractSpec {
        match self {
            Self::Education => &EDUCATION,
            Self::Company => &COMPANY,
            Self::Generic => &GENERIC,
        }
    }
}

#[derive(Debug)]
pub struct ContractSpec {
    pub name: &'static str,
    /// Required comparison-table columns, in header order. Empty means no table is required.
    pub table_columns: &'static [&'static str],
    /// Section titles that must appear verbatim.
    pub sections: &'static [&'static str],
    /// At least one of these must appear.
    pub confidence_labels: &'static [&'static str],
    /// Every one of these must appear (balanced coverage needs both polarities).
    pub news_labels: &'static [&'static str],
    /// Field labels that must appear verbatim.
    pub fields: &'static [&'static str],
}

impl ContractSpec {
    /// The literal header row a well-formed table starts with, e.g. `| A | B |`.
    pub fn table_header(&self) -> Option<String> {
        if self.table_columns.is_empty() {
            return None;
        }
        Some(format!("| {} |", self.table_columns.join(" | ")))
    }
}

pub const SOURCES_SECTION: &str = "Sources";
pub const RECENT_NEWS_SECTION: &str = "Recent News";

const CONFIDENCE_LABELS: &[&str] = &["High Confidence", "Medium Confidence", "Low Confidence"];

static EDUCATION: ContractSpec = ContractSpec {
    name: "education",
    table_columns: &[
        "Institution",
        "Location",
        "Programs",
        "Accreditation",
        "Official Website",
    ],
    sections: &[SOURCES_SECTION],
    confidence_labels: CONFIDENCE_LABELS,
    news_labels: &[],
    fields: &["Official Website", "Contact"],
};

static COMPANY: ContractSpec = ContractSpec {
    name: "company",
    table_columns: &[
        "Company",
        "Headquarters",
        "Industry",
        "Key Products/Services",
        "Official Website",
    ],
    sections: &[SOURCES_SECTION, RECENT_NEWS_SECTION],
    confidence_labels: CONFIDENCE_LABELS,
    news_labels: &["[Positive]", "[Negative]"],
    fields: &["Official Website", "Contact"],
};

static GENERIC: ContractSpec = ContractSpec {
    name: "generic",
    table_columns: &[],
    sections: &[SOURCES_SECTION],
    confidence_labels: &[],
    news_labels: &[],
    fields: &[],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_header_is_pipe_delimited_in_column_order() {
        assert_eq!(
            EntityClass::Education.contract().table_header().as_deref(),
            Some("| Institution | Location | Programs | Accreditation | Official Website |")
        );
        assert_eq!(EntityClass::Generic.contract().table_header(), None);
    }

    #[test]
    fn every_contract_requires_sources() {
        for c in [EntityClass::Education, EntityClass::Company, EntityClass::Generic] {
            assert!(c.contract().sections.contains(&SOURCES_SECTION), "{c:?}");
            assert_eq!(c.contract().name, c.as_str());
        }
    }
}
