//! Generated projects on disk.
//!
//! Every run gets a `website_<unix millis>` directory under the workspace
//! root. The helpers here are what a serving layer needs afterwards: check
//! that the artifacts exist, list past projects, and build a single preview
//! page with styles and scripts inlined.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

pub const PROJECT_PREFIX: &str = "website_";
pub const INDEX_HTML: &str = "index.html";
pub const STYLE_CSS: &str = "style.css";
pub const SCRIPT_JS: &str = "script.js";

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project not found: {name} (searched in {root})")]
    NotFound { name: String, root: PathBuf },
    #[error("Invalid project name: {0}")]
    InvalidName(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Name of a project directory, also the identifier returned by a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectName(String);

impl ProjectName {
    /// Derived from the wall clock, bumped so that names never repeat
    /// within the process even when two runs start in the same millisecond.
    pub fn generate() -> Self {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let previous = LAST_STAMP
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        let stamp = now.max(previous + 1);
        Self(format!("{}{}", PROJECT_PREFIX, stamp))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in a generated name, if it has one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.0.strip_prefix(PROJECT_PREFIX)?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectName {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(['/', '\\']);
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ProjectError::InvalidName(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFlags {
    pub html: bool,
    pub css: bool,
    pub js: bool,
}

/// Contents of the three canonical files of a project, where present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectArtifacts {
    pub name: ProjectName,
    pub dir: PathBuf,
    pub html: Option<String>,
    pub css: Option<String>,
    pub js: Option<String>,
}

impl ProjectArtifacts {
    pub fn flags(&self) -> ArtifactFlags {
        ArtifactFlags {
            html: self.html.is_some(),
            css: self.css.is_some(),
            js: self.js.is_some(),
        }
    }

    pub fn has_markup(&self) -> bool {
        self.html.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    pub fn is_complete(&self) -> bool {
        [&self.html, &self.css, &self.js]
            .iter()
            .all(|f| f.as_deref().is_some_and(|c| !c.trim().is_empty()))
    }

    /// Markup with CSS and JS inlined when the page does not link them itself.
    pub fn combined_html(&self) -> String {
        let mut html = self.html.clone().unwrap_or_default();

        if let Some(css) = self.css.as_deref().filter(|c| !c.is_empty()) {
            if !html.contains(STYLE_CSS) {
                html = insert_before_tag(&html, "</head>", &format!("<style>{}</style>\n", css));
            }
        }

        if let Some(js) = self.js.as_deref().filter(|j| !j.is_empty()) {
            if !html.contains(SCRIPT_JS) {
                html = insert_before_tag(&html, "</body>", &format!("<script>{}</script>\n", js));
            }
        }

        html
    }
}

// Case-insensitive match on the first occurrence of `tag`.
fn insert_before_tag(html: &str, tag: &str, snippet: &str) -> String {
    match html.to_ascii_lowercase().find(tag) {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + snippet.len());
            out.push_str(&html[..pos]);
            out.push_str(snippet);
            out.push_str(&html[pos..]);
            out
        }
        None => html.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: ProjectName,
    pub created: DateTime<Utc>,
    pub files: ArtifactFlags,
    pub index_path: PathBuf,
}

/// Read access to the project directories under one workspace root.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, name: &ProjectName) -> PathBuf {
        self.root.join(name.as_str())
    }

    pub async fn inspect(&self, name: &ProjectName) -> Result<ProjectArtifacts, ProjectError> {
        let dir = self.project_dir(name);
        if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(ProjectError::NotFound {
                name: name.to_string(),
                root: self.root.clone(),
            });
        }

        Ok(ProjectArtifacts {
            name: name.clone(),
            html: read_optional(&dir.join(INDEX_HTML)).await?,
            css: read_optional(&dir.join(STYLE_CSS)).await?,
            js: read_optional(&dir.join(SCRIPT_JS)).await?,
            dir,
        })
    }

    /// Generated projects, newest first.
    pub async fn list(&self) -> Result<Vec<ProjectSummary>, ProjectError> {
        let mut projects = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with(PROJECT_PREFIX) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }

            let name = ProjectName(file_name);
            let dir = entry.path();
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(DateTime::<Utc>::from)
                .ok()
                .or_else(|| name.timestamp())
                .unwrap_or_default();

            projects.push(ProjectSummary {
                files: ArtifactFlags {
                    html: is_file(&dir.join(INDEX_HTML)).await,
                    css: is_file(&dir.join(STYLE_CSS)).await,
                    js: is_file(&dir.join(SCRIPT_JS)).await,
                },
                index_path: dir.join(INDEX_HTML),
                created,
                name,
            });
        }

        projects.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        debug!(count = projects.len(), root = %self.root.display(), "listed projects");
        Ok(projects)
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

async fn read_optional(path: &Path) -> Result<Option<String>, ProjectError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
