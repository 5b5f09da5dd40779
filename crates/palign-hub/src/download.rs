//! Dataset and tokenizer downloading from HuggingFace Hub.

use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use palign_core::{PAlignError, Result, SecretString};
use std::path::PathBuf;

use crate::cache::cache_dir;

/// File extensions the prompt-only loader can read.
pub const DATA_EXTENSIONS: [&str; 3] = ["parquet", "jsonl", "json"];

/// Branch where the Hub publishes auto-converted Parquet exports.
const PARQUET_BRANCH: &str = "refs/convert/parquet";

fn hub_error(e: impl std::fmt::Display) -> PAlignError {
    PAlignError::Hub(e.to_string())
}

/// Build API with optional token authentication.
fn build_api(token: Option<&SecretString>) -> Result<Api> {
    let mut builder = ApiBuilder::new().with_cache_dir(cache_dir());

    if let Some(secret) = token {
        builder = builder.with_token(Some(secret.expose_secret().to_string()));
    }

    builder.build().map_err(hub_error)
}

fn repo(api: &Api, id: &str, repo_type: RepoType, revision: Option<&str>) -> ApiRepo {
    match revision {
        Some(rev) => api.repo(Repo::with_revision(id.to_string(), repo_type, rev.to_string())),
        None => api.repo(Repo::new(id.to_string(), repo_type)),
    }
}

/// Pick the data files in a repository listing that belong to `split`.
///
/// A file belongs to the split when a directory above it is named after the
/// split (`train/0000.parquet`), or its stem is the split (`train.jsonl`) or a
/// `{split}-` shard (`data/train-00000-of-00002.parquet`). When `name` is set, only files under
/// a directory of that name are kept. The result is sorted so shards load in
/// order.
pub fn select_data_files(files: &[String], name: Option<&str>, split: &str) -> Vec<String> {
    let mut selected: Vec<String> = files
        .iter()
        .filter(|f| {
            DATA_EXTENSIONS
                .iter()
                .any(|ext| f.rsplit_once('.').is_some_and(|(_, e)| e == *ext))
        })
        .filter(|f| {
            let parts: Vec<&str> = f.split('/').collect();
            let Some((file, dirs)) = parts.split_last() else {
                return false;
            };
            if let Some(name) = name {
                if !dirs.contains(&name) {
                    return false;
                }
            }
            let stem = file.split('.').next().unwrap_or(file);
            dirs.contains(&split)
                || stem == split
                || stem.strip_prefix(split).is_some_and(|rest| rest.starts_with('-'))
        })
        .cloned()
        .collect();
    selected.sort();
    selected
}

async fn list_files(repo: &ApiRepo) -> Result<Vec<String>> {
    let info = repo.info().await.map_err(hub_error)?;
    Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
}

async fn fetch_all(repo: &ApiRepo, files: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(files.len());
    for file in files {
        tracing::debug!("Downloading {}", file);
        paths.push(repo.get(file).await.map_err(hub_error)?);
    }
    Ok(paths)
}

/// Download the data files of one split of a dataset.
///
/// Files committed to the repository are preferred. When none match the
/// split, the Hub's Parquet export of the `name` subset (or `default`) is
/// used instead.
///
/// # Arguments
/// * `dataset_id` - Dataset identifier (e.g., "PKU-Alignment/PKU-SafeRLHF")
/// * `name` - Optional subset name
/// * `split` - Dataset split (e.g., "train", "test")
/// * `revision` - Optional revision/branch
/// * `token` - Optional authentication token
///
/// # Returns
/// Paths of the downloaded files, in shard order
pub async fn download_dataset_files(
    dataset_id: &str,
    name: Option<&str>,
    split: &str,
    revision: Option<&str>,
    token: Option<&SecretString>,
) -> Result<Vec<PathBuf>> {
    let api = build_api(token)?;

    let main_repo = repo(&api, dataset_id, RepoType::Dataset, revision);
    match list_files(&main_repo).await {
        Ok(files) => {
            let selected = select_data_files(&files, name, split);
            if !selected.is_empty() {
                tracing::info!(
                    "Downloading {} file(s) for {}[{}]",
                    selected.len(),
                    dataset_id,
                    split
                );
                return fetch_all(&main_repo, &selected).await;
            }
        }
        Err(e) => tracing::warn!("Could not list files of {}: {}", dataset_id, e),
    }

    let parquet_repo = repo(&api, dataset_id, RepoType::Dataset, Some(PARQUET_BRANCH));
    let subset = name.unwrap_or("default");
    let files = list_files(&parquet_repo).await?;
    let selected = select_data_files(&files, Some(subset), split);
    if selected.is_empty() {
        return Err(PAlignError::Hub(format!(
            "No data files found for split '{}' in dataset '{}'. \
            Try checking the dataset page for available files.",
            split, dataset_id
        )));
    }

    tracing::info!(
        "Downloading {} converted Parquet file(s) for {}/{}[{}]",
        selected.len(),
        dataset_id,
        subset,
        split
    );
    fetch_all(&parquet_repo, &selected).await
}

/// Download a tokenizer and return the directory containing it.
///
/// `tokenizer.json` is required; `tokenizer_config.json` is fetched when the
/// repository has one.
pub async fn download_tokenizer(
    model_id: &str,
    revision: Option<&str>,
    token: Option<&SecretString>,
) -> Result<PathBuf> {
    let api = build_api(token)?;
    let repo = repo(&api, model_id, RepoType::Model, revision);

    let tokenizer_path = repo.get("tokenizer.json").await.map_err(hub_error)?;
    if let Err(e) = repo.get("tokenizer_config.json").await {
        tracing::debug!("No tokenizer_config.json for {}: {}", model_id, e);
    }

    Ok(tokenizer_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_sharded_split() {
        let listing = files(&[
            ".gitattributes",
            "README.md",
            "data/train-00001-of-00002.parquet",
            "data/test-00000-of-00001.parquet",
            "data/train-00000-of-00002.parquet",
        ]);
        assert_eq!(
            select_data_files(&listing, None, "train"),
            vec![
                "data/train-00000-of-00002.parquet",
                "data/train-00001-of-00002.parquet"
            ]
        );
    }

    #[test]
    fn test_select_split_directory_and_json() {
        let listing = files(&["train/0000.parquet", "test.jsonl", "train.json", "train.txt"]);
        assert_eq!(
            select_data_files(&listing, None, "train"),
            vec!["train.json", "train/0000.parquet"]
        );
        assert_eq!(select_data_files(&listing, None, "test"), vec!["test.jsonl"]);
    }

    #[test]
    fn test_select_with_subset_name() {
        let listing = files(&[
            "default/train/0000.parquet",
            "alpaca/train/0000.parquet",
            "alpaca/test/0000.parquet",
        ]);
        assert_eq!(
            select_data_files(&listing, Some("alpaca"), "train"),
            vec!["alpaca/train/0000.parquet"]
        );
        assert!(select_data_files(&listing, Some("missing"), "train").is_empty());
    }

    #[test]
    fn test_select_skips_similarly_named_splits() {
        let listing = files(&[
            "data/train-00000-of-00001.parquet",
            "data/train_sft-00000-of-00001.parquet",
            "data/train_prefs-00000-of-00001.parquet",
            "test_prefs.jsonl",
            "contest.jsonl",
            "test.jsonl",
        ]);
        assert_eq!(
            select_data_files(&listing, None, "train"),
            vec!["data/train-00000-of-00001.parquet"]
        );
        assert_eq!(select_data_files(&listing, None, "test"), vec!["test.jsonl"]);
        assert_eq!(
            select_data_files(&listing, None, "train_sft"),
            vec!["data/train_sft-00000-of-00001.parquet"]
        );
    }
}
