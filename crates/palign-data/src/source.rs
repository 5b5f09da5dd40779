//! Raw record loading from JSON, JSONL, Parquet, and local dataset directories.

use arrow_json::writer::LineDelimitedWriter;
use palign_core::{PAlignError, PromptOnlyConfig, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// An untyped record: a JSON object of prompt fields.
pub type RawSample = Map<String, Value>;

/// File extensions the loaders understand.
const DATA_EXTENSIONS: [&str; 3] = ["jsonl", "json", "parquet"];

/// What to load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadRequest {
    /// File, directory, or dataset identifier.
    pub path: String,
    /// Dataset configuration name.
    pub name: Option<String>,
    /// Split to load.
    pub split: Option<String>,
    /// Explicit data files, used instead of scanning `path`.
    pub data_files: Vec<PathBuf>,
    /// Extra `key=value` loader options.
    pub optional_args: Vec<String>,
}

impl LoadRequest {
    /// Create a request for a path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Build a request from a dataset configuration.
    pub fn from_config(config: &PromptOnlyConfig) -> Self {
        Self {
            path: config.path.clone(),
            name: config.name.clone(),
            split: config.split.clone(),
            data_files: config.data_files.iter().map(PathBuf::from).collect(),
            optional_args: config.optional_args.clone(),
        }
    }

    /// Parse `optional_args` into loader options.
    pub fn options(&self) -> Result<LoaderOptions> {
        LoaderOptions::parse(&self.optional_args)
    }
}

/// Options recognised in `optional_args`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Key of the array holding the records inside a JSON document.
    pub field: Option<String>,
}

impl LoaderOptions {
    /// Parse `key=value` strings. Unknown keys are logged and skipped.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut options = Self::default();
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                PAlignError::InvalidArgument(format!(
                    "loader option '{}' is not of the form key=value",
                    arg
                ))
            })?;
            match key.trim() {
                "field" => options.field = Some(value.trim().to_string()),
                other => tracing::warn!("Ignoring unknown loader option '{}'", other),
            }
        }
        Ok(options)
    }
}

/// Source of raw records for paths that are not a single JSON/JSONL file.
pub trait RecordLoader: Send + Sync {
    /// Load every record described by the request.
    fn load(&self, request: &LoadRequest) -> Result<Vec<RawSample>>;
}

/// Loads records from local files and directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLoader;

impl RecordLoader for LocalLoader {
    fn load(&self, request: &LoadRequest) -> Result<Vec<RawSample>> {
        let options = request.options()?;
        let root = Path::new(&request.path);

        let files = if !request.data_files.is_empty() {
            request
                .data_files
                .iter()
                .map(|file| {
                    if file.is_relative() && root.is_dir() && !file.exists() {
                        root.join(file)
                    } else {
                        file.clone()
                    }
                })
                .collect()
        } else if root.is_file() {
            vec![root.to_path_buf()]
        } else if root.is_dir() {
            discover_data_files(root, request.name.as_deref(), request.split.as_deref())?
        } else {
            return Err(PAlignError::Dataset(format!(
                "dataset path '{}' does not exist locally; download Hub datasets first",
                request.path
            )));
        };

        let mut records = Vec::new();
        for file in &files {
            let loaded = load_file(file, &options)?;
            tracing::debug!("Loaded {} records from {}", loaded.len(), file.display());
            records.extend(loaded);
        }
        Ok(records)
    }
}

/// Load records for a request.
///
/// Paths ending in `json`/`jsonl` are read directly; everything else goes
/// through `loader`.
pub fn load_records(request: &LoadRequest, loader: &dyn RecordLoader) -> Result<Vec<RawSample>> {
    let records = if request.path.ends_with("jsonl") {
        load_jsonl_file(&request.path)?
    } else if request.path.ends_with("json") {
        load_json_file(&request.path, request.options()?.field.as_deref())?
    } else {
        loader.load(request)?
    };

    tracing::info!("Loaded {} raw records from {}", records.len(), request.path);
    Ok(records)
}

/// Load a single data file, dispatching on its extension.
pub fn load_file(path: &Path, options: &LoaderOptions) -> Result<Vec<RawSample>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") => load_jsonl_file(path),
        Some("json") => load_json_file(path, options.field.as_deref()),
        Some("parquet") => load_parquet_file(path),
        _ => Err(PAlignError::Dataset(format!(
            "unsupported data file '{}', expected one of: {}",
            path.display(),
            DATA_EXTENSIONS.join(", ")
        ))),
    }
}

/// Load a JSON document holding an array of records.
///
/// With `field`, the array is read from that key of a top-level object.
pub fn load_json_file<P: AsRef<Path>>(path: P, field: Option<&str>) -> Result<Vec<RawSample>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        PAlignError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open dataset file {}: {}", path.display(), e),
        ))
    })?;
    let document: Value = serde_json::from_str(&content).map_err(|e| {
        PAlignError::Dataset(format!("{}: invalid JSON: {}", path.display(), e))
    })?;

    let records = match field {
        Some(key) => document.get(key).cloned().ok_or_else(|| {
            PAlignError::Dataset(format!("{}: no '{}' field", path.display(), key))
        })?,
        None => document,
    };

    let Value::Array(items) = records else {
        return Err(PAlignError::Dataset(format!(
            "{}: expected a JSON array of records",
            path.display()
        )));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(obj) => Ok(obj),
            _ => Err(PAlignError::Dataset(format!(
                "{}: record {} is not a JSON object",
                path.display(),
                i
            ))),
        })
        .collect()
}

/// Load one record per non-blank line.
pub fn load_jsonl_file<P: AsRef<Path>>(path: P) -> Result<Vec<RawSample>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        PAlignError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open dataset file {}: {}", path.display(), e),
        ))
    })?;

    let mut records = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_record(&line).map_err(|e| {
            PAlignError::Dataset(format!("{}: line {}: {}", path.display(), line_num + 1, e))
        })?);
    }
    Ok(records)
}

/// Load every row of a Parquet file as a JSON object.
pub fn load_parquet_file<P: AsRef<Path>>(path: P) -> Result<Vec<RawSample>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| parquet_error(path, e))?
        .build()
        .map_err(|e| parquet_error(path, e))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| parquet_error(path, e))?;

        let mut buf = Vec::new();
        {
            let mut writer = LineDelimitedWriter::new(&mut buf);
            writer.write(&batch).map_err(|e| parquet_error(path, e))?;
            writer.finish().map_err(|e| parquet_error(path, e))?;
        }

        let text = std::str::from_utf8(&buf).map_err(|e| parquet_error(path, e))?;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            records.push(parse_record(line).map_err(|e| parquet_error(path, e))?);
        }
    }
    Ok(records)
}

fn parquet_error(path: &Path, e: impl std::fmt::Display) -> PAlignError {
    PAlignError::Dataset(format!("{}: {}", path.display(), e))
}

fn parse_record(line: &str) -> Result<RawSample> {
    match serde_json::from_str::<Value>(line)? {
        Value::Object(obj) => Ok(obj),
        _ => Err(PAlignError::Dataset("record is not a JSON object".to_string())),
    }
}

/// Find data files under a directory, preferring those matching the split.
fn discover_data_files(
    root: &Path,
    name: Option<&str>,
    split: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| DATA_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();

    if let Some(name) = name {
        let named: Vec<PathBuf> = files
            .iter()
            .filter(|p| has_component(root, p, name))
            .cloned()
            .collect();
        if !named.is_empty() {
            files = named;
        }
    }

    if let Some(split) = split {
        let matching: Vec<PathBuf> = files
            .iter()
            .filter(|p| belongs_to_split(root, p, split))
            .cloned()
            .collect();
        if matching.is_empty() {
            tracing::warn!(
                "No data files for split '{}' under {}, using all {} files",
                split,
                root.display(),
                files.len()
            );
        } else {
            files = matching;
        }
    }

    if files.is_empty() {
        return Err(PAlignError::Dataset(format!(
            "no {} files found under {}",
            DATA_EXTENSIONS.join("/"),
            root.display()
        )));
    }
    Ok(files)
}

fn has_component(root: &Path, path: &Path, name: &str) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .parent()
        .is_some_and(|dir| dir.components().any(|c| c.as_os_str() == name))
}

/// A file belongs to `split` when a directory above it is named after the
/// split, or its stem is the split or a `{split}-` shard.
fn belongs_to_split(root: &Path, path: &Path, split: &str) -> bool {
    if has_component(root, path, split) {
        return true;
    }
    let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
        return false;
    };
    let stem = file_name.split('.').next().unwrap_or(file_name);
    stem == split || stem.strip_prefix(split).is_some_and(|rest| rest.starts_with('-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(suffix: &str) -> NamedTempFile {
        tempfile::Builder::new().suffix(suffix).tempfile().unwrap()
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_jsonl_skips_blank_lines() {
        let mut file = temp_file(".jsonl");
        writeln!(file, r#"{{"prompt": "a"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"prompt": "b"}}"#).unwrap();

        let records = load_jsonl_file(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["prompt"], "b");
    }

    #[test]
    fn test_jsonl_reports_line_number() {
        let mut file = temp_file(".jsonl");
        writeln!(file, r#"{{"prompt": "a"}}"#).unwrap();
        writeln!(file, "[1, 2]").unwrap();

        let err = load_jsonl_file(file.path()).unwrap_err().to_string();
        assert!(err.contains("line 2"), "{}", err);
    }

    #[test]
    fn test_json_array() {
        let mut file = temp_file(".json");
        write!(file, r#"[{{"prompt": "a"}}, {{"prompt": "b"}}]"#).unwrap();

        let records = load_json_file(file.path(), None).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_json_field_option() {
        let mut file = temp_file(".json");
        write!(file, r#"{{"version": 2, "data": [{{"prompt": "a"}}]}}"#).unwrap();

        assert!(load_json_file(file.path(), None).is_err());
        let records = load_json_file(file.path(), Some("data")).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_load_records_dispatches_on_suffix() {
        let mut file = temp_file(".json");
        write!(file, r#"{{"rows": [{{"prompt": "x"}}]}}"#).unwrap();

        let mut request = LoadRequest::new(file.path().to_string_lossy());
        request.optional_args = vec!["field=rows".to_string(), "streaming=true".to_string()];
        let records = load_records(&request, &LocalLoader).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_option() {
        assert!(LoaderOptions::parse(&["field".to_string()]).is_err());
    }

    #[test]
    fn test_directory_prefers_split_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "data/train.jsonl", "{\"prompt\": \"t1\"}\n{\"prompt\": \"t2\"}\n");
        write_file(dir.path(), "data/test.jsonl", "{\"prompt\": \"e1\"}\n");
        write_file(dir.path(), "README.md", "# prompts");

        let mut request = LoadRequest::new(dir.path().to_string_lossy());
        request.split = Some("test".to_string());
        let records = LocalLoader.load(&request).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["prompt"], "e1");

        // Unknown split falls back to every data file.
        request.split = Some("validation".to_string());
        assert_eq!(LocalLoader.load(&request).unwrap().len(), 3);
    }

    #[test]
    fn test_split_ignores_similarly_named_splits() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "test.jsonl", "{\"prompt\": \"e1\"}\n");
        write_file(dir.path(), "test_prefs.jsonl", "{\"prompt\": \"p1\"}\n");
        write_file(dir.path(), "contest.jsonl", "{\"prompt\": \"c1\"}\n");
        write_file(dir.path(), "data/train-00000-of-00002.jsonl", "{\"prompt\": \"t1\"}\n");
        write_file(dir.path(), "data/train-00001-of-00002.jsonl", "{\"prompt\": \"t2\"}\n");
        write_file(dir.path(), "data/train_sft-00000-of-00001.jsonl", "{\"prompt\": \"s1\"}\n");
        write_file(dir.path(), "validation/0000.jsonl", "{\"prompt\": \"v1\"}\n");

        let mut request = LoadRequest::new(dir.path().to_string_lossy());
        request.split = Some("test".to_string());
        let records = LocalLoader.load(&request).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["prompt"], "e1");

        request.split = Some("train".to_string());
        let prompts: Vec<_> = LocalLoader
            .load(&request)
            .unwrap()
            .into_iter()
            .map(|r| r["prompt"].clone())
            .collect();
        assert_eq!(prompts, vec!["t1", "t2"]);

        request.split = Some("validation".to_string());
        assert_eq!(LocalLoader.load(&request).unwrap().len(), 1);
    }

    #[test]
    fn test_explicit_data_files_relative_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.jsonl", "{\"prompt\": \"a\"}\n");
        write_file(dir.path(), "b.json", "[{\"prompt\": \"b\"}]");

        let mut request = LoadRequest::new(dir.path().to_string_lossy());
        request.data_files = vec![PathBuf::from("b.json"), PathBuf::from("a.jsonl")];
        let records = LocalLoader.load(&request).unwrap();
        assert_eq!(records[0]["prompt"], "b");
        assert_eq!(records[1]["prompt"], "a");
    }

    #[test]
    fn test_missing_path() {
        let request = LoadRequest::new("/definitely/not/here");
        let err = LocalLoader.load(&request).unwrap_err().to_string();
        assert!(err.contains("does not exist"), "{}", err);
    }

    #[test]
    fn test_parquet_rows_become_records() {
        use arrow::array::{Int64Array, StringArray};
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::arrow_writer::ArrowWriter;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train-00000-of-00001.parquet");

        let schema = Arc::new(Schema::new(vec![
            Field::new("prompt", DataType::Utf8, false),
            Field::new("id", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["Hello", "World"])),
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )
        .unwrap();

        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let records = load_parquet_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["prompt"], "Hello");
        assert_eq!(records[1]["id"], 2);

        // Directories are scanned for parquet shards too.
        let mut request = LoadRequest::new(dir.path().to_string_lossy());
        request.split = Some("train".to_string());
        assert_eq!(LocalLoader.load(&request).unwrap().len(), 2);
    }
}
