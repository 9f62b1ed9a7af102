//! Shipped adapters for the environment collaborators.
//!
//! The engine itself depends only on the traits; these implementations
//! cover the common Python project shapes (requirements.txt and
//! pyproject.toml) plus the PyPI version resolver.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, ScanError};

/// Lists `(package, version-pin)` tuples from a project manifest.
pub trait DependencyLister: Send + Sync + std::fmt::Debug {
    fn list(&self, project_root: &Path) -> Result<Vec<(String, Option<String>)>>;
}

/// Resolves the latest released version of a package.
#[async_trait::async_trait]
pub trait VersionResolver: Send + Sync + std::fmt::Debug {
    async fn latest(&self, package: &str) -> Option<String>;
}

/// Reads `requirements.txt` and `pyproject.toml`, whichever exist.
#[derive(Debug, Default)]
pub struct ManifestLister;

impl DependencyLister for ManifestLister {
    fn list(&self, project_root: &Path) -> Result<Vec<(String, Option<String>)>> {
        let mut deps = Vec::new();

        let requirements = project_root.join("requirements.txt");
        if requirements.exists() {
            let text = std::fs::read_to_string(&requirements).map_err(ScanError::Io)?;
            deps.extend(parse_requirements(&text));
        }

        let pyproject = project_root.join("pyproject.toml");
        if pyproject.exists() {
            let text = std::fs::read_to_string(&pyproject).map_err(ScanError::Io)?;
            deps.extend(parse_pyproject(&text));
        }

        deps.sort();
        deps.dedup_by(|a, b| a.0 == b.0);
        debug!(count = deps.len(), "dependencies listed");
        Ok(deps)
    }
}

/// Parse a requirements.txt body into (name, pin) pairs.
pub fn parse_requirements(text: &str) -> Vec<(String, Option<String>)> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('-') {
                return None;
            }
            parse_requirement_line(line)
        })
        .collect()
}

fn parse_requirement_line(line: &str) -> Option<(String, Option<String>)> {
    // Strip environment markers and extras: `foo[bar]>=1.0; python_version<"3.11"`.
    let line = line.split(';').next()?.trim();
    let specifier_start = line.find(['=', '<', '>', '~', '!']);
    let (name_part, version) = match specifier_start {
        Some(at) => {
            let version = line[at..]
                .trim_start_matches(['=', '<', '>', '~', '!'])
                .trim()
                .to_string();
            (&line[..at], (!version.is_empty()).then_some(version))
        }
        None => (line, None),
    };
    let name = name_part.split('[').next()?.trim().to_lowercase();
    (!name.is_empty()).then(|| (name, version))
}

#[derive(Deserialize)]
struct PyprojectDoc {
    #[serde(default)]
    project: Option<PyprojectProject>,
}

#[derive(Deserialize)]
struct PyprojectProject {
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parse PEP 621 `[project] dependencies` entries.
pub fn parse_pyproject(text: &str) -> Vec<(String, Option<String>)> {
    let Ok(doc) = toml::from_str::<PyprojectDoc>(text) else {
        return Vec::new();
    };
    doc.project
        .map(|p| {
            p.dependencies
                .iter()
                .filter_map(|d| parse_requirement_line(d))
                .collect()
        })
        .unwrap_or_default()
}

/// PyPI JSON API version resolver.
#[derive(Debug, Default)]
pub struct PypiVersionResolver {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct PypiVersionDoc {
    info: PypiVersionInfo,
}

#[derive(Deserialize)]
struct PypiVersionInfo {
    version: String,
}

#[async_trait::async_trait]
impl VersionResolver for PypiVersionResolver {
    async fn latest(&self, package: &str) -> Option<String> {
        let url = format!("https://pypi.org/pypi/{package}/json");
        let resp = self.client.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let doc: PypiVersionDoc = resp.json().await.ok()?;
        Some(doc.info.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_parsing_handles_pins_extras_and_comments() {
        let text = "\
# web stack
fastapi==0.104.1
pydantic>=1.10,<2  # pinned below 2 for now
uvicorn[standard]~=0.23
requests
-r other.txt
";
        let deps = parse_requirements(text);
        assert_eq!(
            deps,
            vec![
                ("fastapi".to_string(), Some("0.104.1".to_string())),
                ("pydantic".to_string(), Some("1.10,<2".to_string())),
                ("uvicorn".to_string(), Some("0.23".to_string())),
                ("requests".to_string(), None),
            ]
        );
    }

    #[test]
    fn pyproject_parsing_reads_pep621_dependencies() {
        let text = r#"
[project]
name = "svc"
dependencies = [
    "sqlalchemy>=1.4",
    "httpx",
]
"#;
        let deps = parse_pyproject(text);
        assert_eq!(
            deps,
            vec![
                ("sqlalchemy".to_string(), Some("1.4".to_string())),
                ("httpx".to_string(), None),
            ]
        );
    }

    #[test]
    fn manifest_lister_merges_and_dedups() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "pydantic==1.10\n").unwrap();
        std::fs::write(
            tmp.path().join("pyproject.toml"),
            "[project]\nname = \"x\"\ndependencies = [\"pydantic>=1\", \"redis\"]\n",
        )
        .unwrap();

        let deps = ManifestLister.list(tmp.path()).unwrap();
        let names: Vec<&str> = deps.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["pydantic", "redis"]);
    }

    #[test]
    fn empty_project_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ManifestLister.list(tmp.path()).unwrap().is_empty());
    }
}
