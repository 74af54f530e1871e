use std::path::Path;

use crate::error::AppError;
use crate::models::Address;

/// Read the address list for a run.
///
/// Plain text files hold one address per line; blank lines are ignored and
/// surrounding whitespace is trimmed. Files ending in `.json` may instead hold
/// an array of strings or of objects with a `url` key.
pub fn load_addresses(path: &Path) -> Result<Vec<Address>, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::InputError(format!("cannot read {}: {e}", path.display())))?;

    let is_json = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let addresses = if is_json {
        parse_json_addresses(&content)
            .map_err(|e| AppError::InputError(format!("{}: {e}", path.display())))?
    } else {
        parse_addresses(&content)
    };

    tracing::info!(count = addresses.len(), path = %path.display(), "Loaded addresses");
    Ok(addresses)
}

/// One address per line, trimmed, blanks dropped. Order and duplicates kept.
pub fn parse_addresses(content: &str) -> Vec<Address> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn parse_json_addresses(content: &str) -> Result<Vec<Address>, String> {
    let value: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let items = value
        .as_array()
        .ok_or_else(|| "expected a JSON array".to_string())?;

    Ok(items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Object(map) => map.get("url").and_then(|u| u.as_str()),
            _ => None,
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

/// Keep only the first `limit` addresses.
pub fn apply_limit(mut addresses: Vec<Address>, limit: Option<usize>) -> Vec<Address> {
    if let Some(limit) = limit {
        addresses.truncate(limit);
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses_trims_and_skips_blanks() {
        let content = "  https://a/item/1.html \n\n\t\nhttps://b/item/2.html\r\n   \n";
        assert_eq!(
            parse_addresses(content),
            vec!["https://a/item/1.html", "https://b/item/2.html"]
        );
    }

    #[test]
    fn test_parse_addresses_keeps_duplicates() {
        let content = "https://a\nhttps://a\n";
        assert_eq!(parse_addresses(content).len(), 2);
    }

    #[test]
    fn test_load_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "https://a\n\nhttps://b\n").unwrap();
        assert_eq!(load_addresses(&path).unwrap(), vec!["https://a", "https://b"]);
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(
            &path,
            r#"[{"url": "https://a", "title": "x"}, {"title": "no url"}, "https://b"]"#,
        )
        .unwrap();
        assert_eq!(load_addresses(&path).unwrap(), vec!["https://a", "https://b"]);
    }

    #[test]
    fn test_invalid_json_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(&path, r#"{"url": "https://a"}"#).unwrap();
        assert!(matches!(
            load_addresses(&path).unwrap_err(),
            AppError::InputError(_)
        ));
    }

    #[test]
    fn test_missing_file_is_input_error() {
        let err = load_addresses(Path::new("/nonexistent/urls.txt")).unwrap_err();
        assert!(matches!(err, AppError::InputError(_)));
    }

    #[test]
    fn test_apply_limit() {
        let addresses = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(apply_limit(addresses.clone(), Some(2)), vec!["a", "b"]);
        assert_eq!(apply_limit(addresses.clone(), Some(10)).len(), 3);
        assert_eq!(apply_limit(addresses, None).len(), 3);
    }
}
