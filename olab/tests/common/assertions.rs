use std::path::Path;

pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected '{needle}' in:\n{haystack}"
    );
}

pub fn assert_path_exists(path: &Path) {
    assert!(path.exists(), "Missing artifact: {}", path.display());
}

/// Read a report artifact and parse it as JSON.
pub fn read_json(path: &Path) -> serde_json::Value {
    assert_path_exists(path);
    let raw = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));
    serde_json::from_str(&raw).unwrap_or_else(|e| panic!("{} is not JSON: {e}", path.display()))
}
