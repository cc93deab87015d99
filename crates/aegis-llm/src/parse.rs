//! Helpers for parsing model output.
//!
//! The gateway itself never interprets completion text, but every caller
//! that expects JSON faces the same failure mode: the model wraps its
//! reply in markdown code fences despite instructions.

/// Extract a JSON block from text that might be wrapped in markdown code
/// fences.  Falls back to the trimmed raw text.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let json_start = start + 3;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    trimmed
}
