//! Fixed prompt text sent to the collaborators.
//!
//! The scrubber's leak patterns (see `scrub`) target echoes of these strings, so edit both
//! together.

use crate::contract::{ContractSpec, EntityClass, RECENT_NEWS_SECTION};

/// Prepended to queries that must be answered from external sources.
pub const VERIFICATION_DIRECTIVE: &str = "IMPORTANT: This question is about a recent or future event, or references dates after 2023. YOU MUST USE SEARCH TOOLS instead of your built-in knowledge. Query:";

/// Instruction for the secondary normalization pass.
pub const REFORMAT_INSTRUCTION: &str = "Reformat this text to have:
- Clear line breaks between sections
- Proper word spacing
- Readable paragraph structure
- No unnecessary concatenation of words
- Use markdown formatting where appropriate
Do not change any facts, names, numbers, links or table cell values. Keep every table row and column.

Text to format:";

const SYSTEM_TEMPLATE: &str = "You are an advanced information retrieval system. Before responding to ANY query, follow this protocol EXACTLY:

1. FIRST, analyze if the query references:
   - Any year from 2023 onwards
   - Recent or upcoming events
   - Current status/information that may have changed after 2023
   - Sports events, competitions, or tournaments (especially when timing is unclear)

2. For queries matching ANY of these criteria, you MUST:
   - IMMEDIATELY use your search tools - DO NOT rely on your pre-trained knowledge
   - NEVER state \"As of my last update\" or similar phrases

3. For the specific query: \"{user_query}\"
   - If it matches the criteria in step 1, use search tools immediately
   - Otherwise you may use general knowledge, but still search when uncertain

4. Always provide sources for your information under a \"Sources\" heading.
5. Show the information in a table whenever it can be shown in a table.";

/// Research guidance carried into every directive, independent of the entity class.
const GUIDELINES: &[&str] = &[
    "For companies, organize by: Overview, Products/Services, Key Facts, Recent News",
    "For schools, organize by: Programs, Admissions, Rankings/Reputation, Facilities, and include accreditation and contact information",
    "For pubs/restaurants, organize by: Location, Hours, Menu, Reviews/Ratings",
    "Include direct quotes from official websites when available",
    "When sources conflict, present all perspectives and indicate which is likely more reliable",
    "Always indicate when information might be outdated",
    "Always indicate whether information comes from searched sources or general knowledge",
];

/// Answer-structure lines naming every marker `spec` is checked against.
fn structure_lines(spec: &ContractSpec) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(header) = spec.table_header() {
        lines.push(format!(
            "Start the comparison table with this exact header row: {header}"
        ));
    }
    if !spec.confidence_labels.is_empty() {
        lines.push(format!(
            "Label each finding with a confidence level: {}",
            spec.confidence_labels.join(", ")
        ));
    }
    if spec.sections.contains(&RECENT_NEWS_SECTION) && !spec.news_labels.is_empty() {
        lines.push(format!(
            "Cover both sides in the \"{RECENT_NEWS_SECTION}\" section and tag each item {}",
            spec.news_labels.join(" or ")
        ));
    }
    if !spec.fields.is_empty() {
        lines.push(format!("Include these fields by name: {}", spec.fields.join(", ")));
    }
    let sections: Vec<String> = spec.sections.iter().map(|s| format!("\"{s}\"")).collect();
    lines.push(format!("Include these headings verbatim: {}", sections.join(", ")));
    lines
}

/// Per-request system directive embedding the user's own wording and the answer structure the
/// validator will check for `entity`.
pub fn system_directive(user_query: &str, entity: EntityClass) -> String {
    let mut out = SYSTEM_TEMPLATE.replace("{user_query}", user_query);
    out.push_str(&format!("\n6. Structure the answer for this {} query:", entity.as_str()));
    for line in structure_lines(entity.contract()) {
        out.push_str("\n   - ");
        out.push_str(&line);
    }
    out.push_str("\n7. Follow these research guidelines:");
    for g in GUIDELINES {
        out.push_str("\n   - ");
        out.push_str(g);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_directive_embeds_the_query_once() {
        let s = system_directive("Champions Trophy 2025 schedule", EntityClass::Generic);
        assert_eq!(s.matches("Champions Trophy 2025 schedule").count(), 1);
        assert!(!s.contains("{user_query}"));
    }

    #[test]
    fn directive_names_every_marker_its_contract_checks() {
        for entity in [EntityClass::Education, EntityClass::Company, EntityClass::Generic] {
            let spec = entity.contract();
            let s = system_directive("q", entity);
            if let Some(header) = spec.table_header() {
                assert!(s.contains(&header), "{entity:?}: table header");
            }
            let markers = spec
                .sections
                .iter()
                .chain(spec.confidence_labels)
                .chain(spec.news_labels)
                .chain(spec.fields);
            for m in markers {
                assert!(s.contains(m), "{entity:?}: {m}");
            }
        }
    }

    #[test]
    fn directive_structure_follows_the_entity_class() {
        let edu = system_directive("Tell me about XYZ University", EntityClass::Education);
        assert!(edu.contains("| Institution | Location |"));
        assert!(edu.contains("High Confidence"));
        assert!(edu.contains("Contact"));
        assert!(!edu.contains("[Positive]"));

        let generic = system_directive("how do tides work", EntityClass::Generic);
        assert!(!generic.contains("comparison table with this exact header row"));
        assert!(!generic.contains("confidence level:"));
        assert!(generic.contains("When sources conflict"));
    }
}
