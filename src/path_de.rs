//! Deserialization with JSON-path context, for option files and fixture suites.
use std::path::Path;

use serde::de::DeserializeOwned;

/// Deserialize `src`, naming the JSON path of the offending value on failure.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        format!("at JSON path {path} → {}", err.into_inner())
    })
}

/// Read and deserialize a file; errors carry both the file and the JSON path.
pub fn from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let src = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    from_str_with_path(&src).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Case {
        #[allow(dead_code)]
        tests: Vec<Test>,
    }

    #[derive(Debug, Deserialize)]
    struct Test {
        #[allow(dead_code)]
        valid: bool,
    }

    #[test]
    fn errors_name_the_nested_path() {
        let err = from_str_with_path::<Case>(r#"{"tests": [{"valid": true}, {"valid": "yes"}]}"#).unwrap_err();
        assert!(err.starts_with("at JSON path tests[1].valid"), "{err}");
    }
}
