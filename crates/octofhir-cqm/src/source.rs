//! File-backed resource source
//!
//! Library paths may name single documents or directories; a directory
//! contributes every `.json` file in it, in file-name order.

use octofhir_cqm_eval::{EvalError, EvalResult, ResourceSource};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads libraries, value sets and data from the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FileResourceSource {
    libraries: Vec<PathBuf>,
    value_sets: Option<PathBuf>,
    data: Option<PathBuf>,
}

impl FileResourceSource {
    pub fn new(libraries: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            libraries: libraries.into_iter().collect(),
            value_sets: None,
            data: None,
        }
    }

    pub fn with_value_sets(mut self, path: Option<PathBuf>) -> Self {
        self.value_sets = path;
        self
    }

    pub fn with_data(mut self, path: Option<PathBuf>) -> Self {
        self.data = path;
        self
    }

    /// Documents a library path stands for
    fn library_files(path: &Path) -> EvalResult<Vec<PathBuf>> {
        if !path.is_dir() {
            return Ok(vec![path.to_path_buf()]);
        }
        let entries = fs::read_dir(path).map_err(|e| read_error(path, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let file = entry.map_err(|e| read_error(path, e))?.path();
            if file.extension().is_some_and(|ext| ext == "json") {
                files.push(file);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl ResourceSource for FileResourceSource {
    fn library_texts(&self) -> EvalResult<Vec<String>> {
        let mut texts = Vec::new();
        for path in &self.libraries {
            for file in Self::library_files(path)? {
                log::debug!("reading library document {}", file.display());
                texts.push(read(&file)?);
            }
        }
        Ok(texts)
    }

    fn value_set_text(&self) -> EvalResult<Option<String>> {
        self.value_sets.as_deref().map(read).transpose()
    }

    fn data_text(&self) -> EvalResult<Option<String>> {
        self.data.as_deref().map(read).transpose()
    }
}

fn read(path: &Path) -> EvalResult<String> {
    fs::read_to_string(path).map_err(|e| read_error(path, e))
}

fn read_error(path: &Path, err: std::io::Error) -> EvalError {
    EvalError::malformed(format!("cannot read {}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_cqm_eval::ErrorKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_directory_contributes_json_files_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.json"), "{\"b\": 1}").unwrap();
        fs::write(dir.path().join("a.json"), "{\"a\": 1}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = FileResourceSource::new([dir.path().to_path_buf()]);
        assert_eq!(
            source.library_texts().unwrap(),
            vec!["{\"a\": 1}".to_string(), "{\"b\": 1}".to_string()]
        );
        assert_eq!(source.value_set_text().unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_malformed_input() {
        let source = FileResourceSource::default().with_data(Some(PathBuf::from("/nonexistent/data.json")));
        let err = source.data_text().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }
}
