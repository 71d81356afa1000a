//! Pull JSON out of free-form model replies

use serde::de::DeserializeOwned;

use crate::error::{PortalError, Result};

/// Extract a JSON object from a response that might contain markdown or other text
///
/// Handles:
/// - ```json code blocks
/// - Plain ``` code blocks
/// - Raw JSON objects surrounded by prose
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Some(text[json_start..json_start + end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let block_start = start + 3;
        let content_start = text[block_start..]
            .find('\n')
            .map(|i| block_start + i + 1)
            .unwrap_or(block_start);
        if let Some(end) = text[content_start..].find("```") {
            return Some(text[content_start..content_start + end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Extract and deserialize the JSON object in a model reply
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T> {
    let json = extract_json_object(text).ok_or_else(|| {
        PortalError::GenerationFailed("no JSON object found in response".to_string())
    })?;
    serde_json::from_str(json)
        .map_err(|e| PortalError::GenerationFailed(format!("unparseable response: {}", e)))
}
