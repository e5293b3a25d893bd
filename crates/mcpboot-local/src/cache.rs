//! Content-addressed cache keyed on a prompt fingerprint and a fetched-content
//! fingerprint, so an identical prompt against identical source documents
//! skips planning and compilation entirely.
//!
//! The on-disk write is tmp-then-rename, grounded on the teacher's
//! `webpipe-local/src/cache_search.rs::save_persisted_corpus`; a corrupt or
//! unreadable cache file is treated as a miss and deleted rather than
//! surfaced as an error.

use mcpboot_core::{CacheEntry, CompiledTools, Error, FetchedContent, GenerationPlan, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const FINGERPRINT_CHARS: usize = 16;

fn fingerprint(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..FINGERPRINT_CHARS].to_string()
}

/// Fingerprint of the raw user prompt.
pub fn prompt_fingerprint(prompt: &str) -> String {
    fingerprint(prompt.trim())
}

/// Fingerprint of the set of fetched documents, order-independent: sorted
/// by URL and concatenated before hashing, so fetch order never perturbs
/// the cache key.
pub fn content_fingerprint(documents: &[FetchedContent]) -> String {
    let mut sorted: Vec<&FetchedContent> = documents.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url));
    let mut joined = String::new();
    for doc in sorted {
        joined.push_str(&doc.url);
        joined.push('\0');
        joined.push_str(&doc.text);
        joined.push('\0');
    }
    fingerprint(&joined)
}

pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, prompt_fp: &str, content_fp: &str) -> PathBuf {
        self.dir.join(format!("{prompt_fp}-{content_fp}.json"))
    }

    /// Looks up a cache entry. A missing file, a read error, or a corrupt
    /// body are all treated as a plain miss; a corrupt file is removed so
    /// later requests don't pay the read cost again.
    pub async fn get(&self, prompt_fp: &str, content_fp: &str) -> Option<CacheEntry> {
        let path = self.entry_path(prompt_fp, content_fp);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding corrupt cache entry");
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
        }
    }

    /// Persists a cache entry via a temp file in the same directory
    /// followed by a rename, so a crash mid-write never leaves a partially
    /// written entry at the real path.
    pub async fn set(
        &self,
        prompt_fp: &str,
        content_fp: &str,
        plan: &GenerationPlan,
        compiled: &CompiledTools,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Cache(format!("failed to create cache dir: {e}")))?;

        let entry = CacheEntry {
            prompt_fingerprint: prompt_fp.to_string(),
            content_fingerprint: content_fp.to_string(),
            plan: plan.clone(),
            compiled_tools: compiled.to_vec(),
            whitelist_domains: compiled.whitelist_domains.clone(),
            created_at,
        };
        let body = serde_json::to_vec_pretty(&entry)
            .map_err(|e| Error::Cache(format!("failed to serialize cache entry: {e}")))?;

        let final_path = self.entry_path(prompt_fp, content_fp);
        let tmp_path = self.dir.join(format!("{prompt_fp}-{content_fp}.json.tmp"));
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| Error::Cache(format!("failed to write cache entry: {e}")))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| Error::Cache(format!("failed to finalize cache entry: {e}")))?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpboot_core::{CompiledTool, PlannedTool};

    fn doc(url: &str, text: &str) -> FetchedContent {
        FetchedContent {
            url: url.to_string(),
            text: text.to_string(),
            content_type: "text/plain".to_string(),
            discovered_urls: vec![],
        }
    }

    #[test]
    fn content_fingerprint_is_order_independent() {
        let a = content_fingerprint(&[doc("https://b.example", "B"), doc("https://a.example", "A")]);
        let b = content_fingerprint(&[doc("https://a.example", "A"), doc("https://b.example", "B")]);
        assert_eq!(a, b);
    }

    #[test]
    fn content_fingerprint_changes_with_content() {
        let a = content_fingerprint(&[doc("https://a.example", "A")]);
        let b = content_fingerprint(&[doc("https://a.example", "changed")]);
        assert_ne!(a, b);
    }

    #[test]
    fn prompt_fingerprint_is_stable() {
        assert_eq!(prompt_fingerprint("build me a tool"), prompt_fingerprint("build me a tool"));
        assert_ne!(prompt_fingerprint("build me a tool"), prompt_fingerprint("build me another tool"));
    }

    #[tokio::test]
    async fn round_trips_through_set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let plan = GenerationPlan {
            tools: vec![PlannedTool {
                name: "echo".to_string(),
                description: "d".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                endpoints_used: vec![],
                implementation_notes: "n".to_string(),
                needs_network: false,
            }],
        };
        let compiled = CompiledTools::from_plan_and_tools(
            vec![CompiledTool {
                plan: plan.tools[0].clone(),
                handler_source: "return { content: [] };".to_string(),
            }],
            vec![],
        );

        cache.set("abc", "def", &plan, &compiled, chrono::Utc::now()).await.unwrap();
        let restored = cache.get("abc", "def").await.unwrap();
        assert_eq!(restored.compiled_tools.len(), 1);
        assert_eq!(restored.compiled_tools[0].plan.name, "echo");
    }

    #[tokio::test]
    async fn missing_entry_is_a_plain_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        assert!(cache.get("nope", "nope").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_treated_as_a_miss_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        let path = dir.path().join("bad-fp.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(cache.get("bad", "fp").await.is_none());
        assert!(!path.exists());
    }
}
