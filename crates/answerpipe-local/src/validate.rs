//! Contract validation and additive correction.
//!
//! The validator only sees text, so every check is a literal substring test. Corrections are
//! appended notices; existing content is never rewritten or removed.

use crate::contract::{ContractSpec, EntityClass, RECENT_NEWS_SECTION, SOURCES_SECTION};
use serde::Serialize;

pub const TABLE_MARKER: &str = "> **Incomplete table:**";
pub const SOURCES_MARKER: &str = "> **Missing Sources section:**";
pub const CONFIDENCE_MARKER: &str = "> **Missing confidence labels:**";
pub const NEWS_MARKER: &str = "> **Unbalanced news coverage:**";
pub const FIELDS_MARKER: &str = "> **Missing fields:**";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The header row is absent or the document has too few cells.
    Table {
        columns: Vec<&'static str>,
        /// Columns whose name appears nowhere in the document.
        missing_columns: Vec<&'static str>,
    },
    Sources,
    ConfidenceLabels { expected: Vec<&'static str> },
    News {
        missing_section: bool,
        missing_labels: Vec<&'static str>,
    },
    Fields { missing: Vec<&'static str> },
}

impl Finding {
    /// Fixed per-category prefix; a document that already contains it is not noticed again.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Table { .. } => TABLE_MARKER,
            Self::Sources => SOURCES_MARKER,
            Self::ConfidenceLabels { .. } => CONFIDENCE_MARKER,
            Self::News { .. } => NEWS_MARKER,
            Self::Fields { .. } => FIELDS_MARKER,
        }
    }

    pub fn notice(&self) -> String {
        let body = match self {
            Self::Table {
                columns,
                missing_columns,
            } => {
                let mut s = format!(
                    "the comparison table is missing or has too few filled cells. Required columns: {}.",
                    columns.join(", ")
                );
                if !missing_columns.is_empty() {
                    s.push_str(&format!(" Not found: {}.", missing_columns.join(", ")));
                }
                s
            }
            Self::Sources => {
                "no Sources section was found. Verify this information independently before relying on it."
                    .to_string()
            }
            Self::ConfidenceLabels { expected } => format!(
                "no confidence level was stated. Expected one of: {}.",
                expected.join(", ")
            ),
            Self::News {
                missing_section,
                missing_labels,
            } => {
                let mut missing = Vec::new();
                if *missing_section {
                    missing.push(RECENT_NEWS_SECTION);
                }
                missing.extend(missing_labels.iter().copied());
                format!(
                    "news coverage may be one-sided. Not found: {}.",
                    missing.join(", ")
                )
            }
            Self::Fields { missing } => format!(
                "{} could not be found and were not filled in.",
                missing.join(", ")
            ),
        };
        format!("{} {body}", self.marker())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// In category order: table, sources, confidence, news, fields.
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Approximate table check: the literal header row is present and the document holds at least
/// two pipes per required column.
///
/// A header plus its `|---|` separator row already satisfies the pipe count, so an empty table
/// passes. Conversely a well-filled table with different header spacing fails.
pub fn table_is_well_formed(doc: &str, spec: &ContractSpec) -> bool {
    let Some(header) = spec.table_header() else {
        return true;
    };
    doc.contains(&header) && doc.matches('|').count() >= 2 * spec.table_columns.len()
}

pub fn check(doc: &str, spec: &ContractSpec) -> ValidationReport {
    let mut findings = Vec::new();

    if !table_is_well_formed(doc, spec) {
        findings.push(Finding::Table {
            columns: spec.table_columns.to_vec(),
            missing_columns: spec
                .table_columns
                .iter()
                .copied()
                .filter(|c| !doc.contains(c))
                .collect(),
        });
    }

    if spec.sections.contains(&SOURCES_SECTION) && !doc.contains(SOURCES_SECTION) {
        findings.push(Finding::Sources);
    }

    if !spec.confidence_labels.is_empty()
        && !spec.confidence_labels.iter().any(|l| doc.contains(l))
    {
        findings.push(Finding::ConfidenceLabels {
            expected: spec.confidence_labels.to_vec(),
        });
    }

    let wants_news = spec.sections.contains(&RECENT_NEWS_SECTION);
    let missing_section = wants_news && !doc.contains(RECENT_NEWS_SECTION);
    let missing_labels: Vec<&'static str> = spec
        .news_labels
        .iter()
        .copied()
        .filter(|l| !doc.contains(l))
        .collect();
    if missing_section || !missing_labels.is_empty() {
        findings.push(Finding::News {
            missing_section,
            missing_labels,
        });
    }

    let missing_fields: Vec<&'static str> = spec
        .fields
        .iter()
        .copied()
        .filter(|f| !doc.contains(f))
        .collect();
    if !missing_fields.is_empty() {
        findings.push(Finding::Fields {
            missing: missing_fields,
        });
    }

    ValidationReport { findings }
}

/// Appends one notice per finding whose marker is not already in `doc`.
pub fn correct(doc: &str, report: &ValidationReport) -> String {
    let mut out = doc.to_string();
    for f in &report.findings {
        if out.contains(f.marker()) {
            continue;
        }
        out.push_str("\n\n");
        out.push_str(&f.notice());
    }
    out
}

pub fn validate(doc: &str, entity: EntityClass) -> (String, ValidationReport) {
    let report = check(doc, entity.contract());
    let corrected = correct(doc, &report);
    (corrected, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [EntityClass; 3] = [
        EntityClass::Education,
        EntityClass::Company,
        EntityClass::Generic,
    ];

    const EDU_OK: &str = "## Overview
| Institution | Location | Programs | Accreditation | Official Website |
|---|---|---|---|---|
| XYZ University | Springfield | CS, Law | HLC | https://xyz.edu |

Contact: admissions@xyz.edu (Official Website listed above). High Confidence.

## Sources
- https://xyz.edu";

    #[test]
    fn complete_education_answer_is_clean_and_unchanged() {
        let (out, report) = validate(EDU_OK, EntityClass::Education);
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(out, EDU_OK);
    }

    #[test]
    fn missing_sources_gets_a_notice() {
        let doc = EDU_OK.replace("## Sources\n- https://xyz.edu", "");
        let (out, report) = validate(&doc, EntityClass::Education);
        assert_eq!(report.findings, vec![Finding::Sources]);
        assert!(out.starts_with(&doc));
        assert!(out.contains(SOURCES_MARKER));
        assert!(out.contains("no Sources section was found"));
    }

    #[test]
    fn generic_contract_only_requires_sources() {
        let (out, report) = validate("Tides are caused by the moon.", EntityClass::Generic);
        assert_eq!(report.findings, vec![Finding::Sources]);
        assert!(out.ends_with(&Finding::Sources.notice()));

        let (_, clean) = validate("Tides.\n\nSources: NOAA", EntityClass::Generic);
        assert!(clean.is_clean());
    }

    #[test]
    fn company_answer_reports_every_category_in_order() {
        let (out, report) = validate(
            "Acme makes anvils. [Positive] record sales.",
            EntityClass::Company,
        );
        let kinds: Vec<&str> = report.findings.iter().map(|f| f.marker()).collect();
        assert_eq!(
            kinds,
            vec![
                TABLE_MARKER,
                SOURCES_MARKER,
                CONFIDENCE_MARKER,
                NEWS_MARKER,
                FIELDS_MARKER
            ]
        );
        match &report.findings[3] {
            Finding::News {
                missing_section,
                missing_labels,
            } => {
                assert!(*missing_section);
                assert_eq!(missing_labels, &vec!["[Negative]"]);
            }
            other => panic!("unexpected finding: {other:?}"),
        }
        assert!(out.contains("Not found: Recent News, [Negative]."));
        assert!(out.contains("Official Website, Contact could not be found"));
    }

    #[test]
    fn pipe_count_heuristic_accepts_an_empty_table() {
        // Header + separator rows alone carry 12 pipes >= 2 * 5 columns.
        let doc = "| Institution | Location | Programs | Accreditation | Official Website |\n|---|---|---|---|---|";
        assert!(table_is_well_formed(doc, EntityClass::Education.contract()));
    }

    #[test]
    fn pipe_count_heuristic_rejects_reformatted_header_spacing() {
        let doc = "|Institution|Location|Programs|Accreditation|Official Website|\n|---|---|---|---|---|\n|XYZ|Springfield|CS|HLC|xyz.edu|";
        assert!(!table_is_well_formed(doc, EntityClass::Education.contract()));
    }

    #[test]
    fn header_without_enough_pipes_is_incomplete() {
        let spec = EntityClass::Education.contract();
        let header = spec.table_header().unwrap();
        // The header alone has 6 pipes; 10 are required.
        assert!(!table_is_well_formed(&header, spec));
        let report = check(&header, spec);
        assert!(matches!(
            report.findings.first(),
            Some(Finding::Table { missing_columns, .. }) if missing_columns.is_empty()
        ));
    }

    #[test]
    fn second_run_appends_nothing() {
        let (once, _) = validate("Acme Corp overview.", EntityClass::Company);
        let (twice, _) = validate(&once, EntityClass::Company);
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn output_always_extends_input(doc in any::<String>(), which in 0usize..3) {
            let entity = ALL[which];
            let (out, _) = validate(&doc, entity);
            prop_assert!(out.starts_with(&doc));
        }

        #[test]
        fn validation_is_idempotent(
            parts in prop::collection::vec(
                prop_oneof![
                    Just("Sources".to_string()),
                    Just("Recent News".to_string()),
                    Just("[Positive]".to_string()),
                    Just("Official Website".to_string()),
                    Just("| Company | Headquarters | Industry | Key Products/Services | Official Website |".to_string()),
                    Just("|---|---|".to_string()),
                    "[a-z |\n]{0,20}",
                ],
                0..8,
            ),
            which in 0usize..3,
        ) {
            let entity = ALL[which];
            let doc = parts.join(" ");
            let (once, _) = validate(&doc, entity);
            let (twice, _) = validate(&once, entity);
            prop_assert_eq!(&once, &twice);
            let markers = [
                TABLE_MARKER,
                SOURCES_MARKER,
                CONFIDENCE_MARKER,
                NEWS_MARKER,
                FIELDS_MARKER,
            ];
            for marker in markers {
                prop_assert!(twice.matches(marker).count() <= 1);
            }
        }
    }
}
