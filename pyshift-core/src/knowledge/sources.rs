//! Changelog source fetching.
//!
//! The shipped fetcher asks the PyPI JSON API for a package's project
//! URLs, picks the ones that look like changelogs or migration guides,
//! and downloads them. GitHub repository URLs additionally get a raw
//! `CHANGELOG.md` probe, which is where most projects keep release notes.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::KnowledgeError;
use crate::oracle::{with_backoff, SourceDocument};

/// Returns changelog/migration-guide documents for a package upgrade.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(
        &self,
        package: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<Vec<SourceDocument>, KnowledgeError>;
}

/// PyPI-backed fetcher.
#[derive(Debug)]
pub struct PypiSourceFetcher {
    client: Client,
    max_documents: u32,
}

impl PypiSourceFetcher {
    pub fn new(max_documents: u32) -> Self {
        Self {
            client: Client::new(),
            max_documents,
        }
    }

    async fn get_text(&self, url: &str) -> Result<(String, String), KnowledgeError> {
        let client = self.client.clone();
        let url_owned = url.to_string();
        let response = with_backoff(3, || {
            let client = client.clone();
            let url = url_owned.clone();
            async move {
                let resp = client
                    .get(&url)
                    .header("user-agent", "pyshift")
                    .send()
                    .await
                    .map_err(|e| crate::error::OracleError::Network(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(crate::error::OracleError::Api {
                        status: resp.status().as_u16(),
                        body: String::new(),
                    });
                }
                let content_type = resp
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("text/plain")
                    .to_string();
                let body = resp
                    .text()
                    .await
                    .map_err(|e| crate::error::OracleError::Network(e.to_string()))?;
                Ok((body, content_type))
            }
        })
        .await
        .map_err(|e| KnowledgeError::Fetch {
            library: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(response)
    }
}

#[derive(Deserialize)]
struct PypiProject {
    info: PypiInfo,
}

#[derive(Deserialize)]
struct PypiInfo {
    #[serde(default)]
    project_urls: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    home_page: Option<String>,
}

#[async_trait::async_trait]
impl SourceFetcher for PypiSourceFetcher {
    async fn fetch(
        &self,
        package: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<Vec<SourceDocument>, KnowledgeError> {
        debug!(package, from_version, to_version, "fetching changelog sources");

        let meta_url = format!("https://pypi.org/pypi/{package}/json");
        let (body, _) = self.get_text(&meta_url).await?;
        let project: PypiProject =
            serde_json::from_str(&body).map_err(KnowledgeError::Serialization)?;

        let mut urls = candidate_urls(
            project.info.project_urls.as_ref(),
            project.info.home_page.as_deref(),
        );
        urls.truncate(self.max_documents as usize);

        let mut documents = Vec::new();
        for url in urls {
            match self.get_text(&url).await {
                Ok((content, content_type)) => documents.push(SourceDocument {
                    url,
                    content_type,
                    content,
                }),
                Err(e) => {
                    // One dead link does not fail the acquisition.
                    warn!(%url, error = %e, "changelog source unavailable");
                }
            }
        }
        Ok(documents)
    }
}

/// Pick and order the URLs worth fetching from a package's metadata.
///
/// Explicit changelog-ish project URLs come first; a GitHub repository
/// URL contributes a raw `CHANGELOG.md` probe.
pub fn candidate_urls(
    project_urls: Option<&std::collections::BTreeMap<String, String>>,
    home_page: Option<&str>,
) -> Vec<String> {
    const CHANGELOG_KEYS: &[&str] = &["changelog", "changes", "release notes", "news", "migration"];

    let mut urls = Vec::new();
    let mut repo_urls = Vec::new();

    let mut consider = |label: &str, url: &str| {
        let label_lower = label.to_lowercase();
        if CHANGELOG_KEYS.iter().any(|k| label_lower.contains(k)) {
            urls.push(url.to_string());
        } else if url.contains("github.com/") {
            repo_urls.push(url.to_string());
        }
    };

    if let Some(map) = project_urls {
        for (label, url) in map {
            consider(label, url);
        }
    }
    if let Some(home) = home_page {
        consider("homepage", home);
    }

    for repo in repo_urls {
        if let Some(raw) = github_raw_changelog(&repo) {
            if !urls.contains(&raw) {
                urls.push(raw);
            }
        }
    }

    urls.dedup();
    urls
}

fn github_raw_changelog(repo_url: &str) -> Option<String> {
    let rest = repo_url.split("github.com/").nth(1)?;
    let mut parts = rest.trim_end_matches('/').splitn(3, '/');
    let owner = parts.next()?;
    let repo = parts.next()?.trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!(
        "https://raw.githubusercontent.com/{owner}/{repo}/HEAD/CHANGELOG.md"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(pairs: &[(&str, &str)]) -> std::collections::BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn picks_changelog_labels() {
        let map = urls(&[
            ("Changelog", "https://docs.example/changelog"),
            ("Funding", "https://sponsor.example"),
            ("Release Notes", "https://docs.example/releases"),
        ]);
        let got = candidate_urls(Some(&map), None);
        assert_eq!(
            got,
            vec![
                "https://docs.example/changelog".to_string(),
                "https://docs.example/releases".to_string(),
            ]
        );
    }

    #[test]
    fn github_repo_becomes_raw_changelog_probe() {
        let map = urls(&[("Source", "https://github.com/pydantic/pydantic")]);
        let got = candidate_urls(Some(&map), None);
        assert_eq!(
            got,
            vec!["https://raw.githubusercontent.com/pydantic/pydantic/HEAD/CHANGELOG.md".to_string()]
        );
    }

    #[test]
    fn home_page_github_counts_as_repo() {
        let got = candidate_urls(None, Some("https://github.com/psf/requests"));
        assert_eq!(
            got,
            vec!["https://raw.githubusercontent.com/psf/requests/HEAD/CHANGELOG.md".to_string()]
        );
    }

    #[test]
    fn no_metadata_means_no_urls() {
        assert!(candidate_urls(None, None).is_empty());
        assert!(candidate_urls(None, Some("https://example.com")).is_empty());
    }

    #[test]
    fn raw_changelog_handles_git_suffix_and_trailing_slash() {
        assert_eq!(
            github_raw_changelog("https://github.com/psf/requests.git").unwrap(),
            "https://raw.githubusercontent.com/psf/requests/HEAD/CHANGELOG.md"
        );
        assert_eq!(
            github_raw_changelog("https://github.com/psf/requests/").unwrap(),
            "https://raw.githubusercontent.com/psf/requests/HEAD/CHANGELOG.md"
        );
        assert!(github_raw_changelog("https://gitlab.com/x/y").is_none());
    }
}
