//! Attestation grammar for non-trivial status changes.
//!
//! The free text must contain both canonical phrases, case-insensitively.
//! The phrasing is deliberately awkward to paste without reading.

pub const ATTEST_EXAMPLE: &str = "I have actually [DESCRIBE THE CONCRETE CHANGE YOU MADE] \
and I am not gaming the score by resolving without fixing.";

const REQUIRED_PHRASES: [&str; 2] = ["i have actually", "not gaming"];

pub fn missing_attestation_phrases(attestation: Option<&str>) -> Vec<&'static str> {
    let normalized = attestation
        .unwrap_or("")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    REQUIRED_PHRASES
        .iter()
        .copied()
        .filter(|phrase| !normalized.contains(phrase))
        .collect()
}

pub fn validate_attestation(attestation: Option<&str>) -> bool {
    missing_attestation_phrases(attestation).is_empty()
}

/// Human-readable rejection for commands that require an attestation.
pub fn attestation_requirement(label: &str, attestation: Option<&str>) -> String {
    let missing = missing_attestation_phrases(attestation);
    let detail = if attestation.is_none() {
        format!("{label} requires --attest.")
    } else {
        let list = missing
            .iter()
            .map(|p| format!("'{p}'"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{label} attestation is missing required phrase(s): {list}.")
    };
    format!(
        "{detail} Required phrases: 'I have actually' and 'not gaming'. Example: --attest \"{ATTEST_EXAMPLE}\""
    )
}
