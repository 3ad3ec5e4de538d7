// External collaborators
//
// The engine never parses credentials, stores files or owns role names.
// Those come from the surrounding application through these traits.
// Read-side enrichment only; none of them take part in engine writes.
//
// Decision: StaticDirectory (YAML) backs identity and role names in dev mode
// Decision: Subjects are looked up per workflow subject kind, with a
//           permissive fallback so a workflow without a kind still starts

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::{EngineError, Result};
use crate::instance::FileRef;
use crate::{ActorId, RoleId};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    /// Administrators see every instance and may run administrative deletes.
    #[serde(default)]
    pub admin: bool,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>) -> Self {
        Self {
            id: id.into(),
            roles: vec![],
            admin: false,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<RoleId>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    /// Anonymous administrator used when authentication is disabled.
    pub fn anonymous() -> Self {
        Self::new("anonymous").admin()
    }
}

/// Resolves a credential issued by the identity layer into an actor.
#[async_trait]
pub trait ActorResolver: Send + Sync {
    /// Returns None for an unknown or invalid credential.
    async fn resolve(&self, credential: &str) -> Result<Option<Actor>>;

    /// Display name for presentation. None when unknown.
    async fn display_name(&self, _actor_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// File storage lookup, used only to attach metadata to trail entries.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Resolve every id. Fails with `FileNotFound` on the first unknown id.
    async fn resolve_files(&self, file_ids: &[String]) -> Result<Vec<FileRef>>;
}

/// Role display names, used only for read-side enrichment.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn resolve_role_name(&self, role_id: &str) -> Result<Option<String>>;
}

/// Summary of the business entity an instance is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SubjectSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Read access to one kind of business subject (job applications,
/// citizen requests, ...). One engine serves every kind.
#[async_trait]
pub trait SubjectProvider: Send + Sync {
    /// None when the subject does not exist.
    async fn describe(&self, subject_id: &str) -> Result<Option<SubjectSummary>>;
}

/// Accepts any subject id. Used when a workflow has no registered kind.
#[derive(Debug, Clone, Default)]
pub struct OpenSubjects;

#[async_trait]
impl SubjectProvider for OpenSubjects {
    async fn describe(&self, subject_id: &str) -> Result<Option<SubjectSummary>> {
        Ok(Some(SubjectSummary {
            id: subject_id.to_string(),
            kind: None,
            title: None,
        }))
    }
}

/// Subject providers keyed by workflow subject kind.
#[derive(Clone)]
pub struct SubjectRegistry {
    providers: HashMap<String, Arc<dyn SubjectProvider>>,
    fallback: Arc<dyn SubjectProvider>,
}

impl SubjectRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            fallback: Arc::new(OpenSubjects),
        }
    }

    pub fn register(mut self, kind: impl Into<String>, provider: Arc<dyn SubjectProvider>) -> Self {
        self.providers.insert(kind.into(), provider);
        self
    }

    pub fn provider_for(&self, kind: Option<&str>) -> Arc<dyn SubjectProvider> {
        kind.and_then(|k| self.providers.get(k))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// In-process implementations
// ============================================

/// File registry held in memory.
#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<String, String>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, display_name: impl Into<String>) {
        self.files.write().insert(id.into(), display_name.into());
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn resolve_files(&self, file_ids: &[String]) -> Result<Vec<FileRef>> {
        let files = self.files.read();
        file_ids
            .iter()
            .map(|id| {
                files
                    .get(id)
                    .map(|display_name| FileRef {
                        id: id.clone(),
                        display_name: display_name.clone(),
                    })
                    .ok_or_else(|| EngineError::FileNotFound(id.clone()))
            })
            .collect()
    }
}

/// One actor entry in the directory file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryActor {
    pub id: ActorId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub admin: bool,
    /// Bearer tokens that authenticate as this actor.
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Directory file layout.
///
/// ```yaml
/// roles:
///   recruiter: Recruiter
/// actors:
///   - id: u1
///     name: Alice
///     roles: [recruiter]
///     tokens: [dev-token-alice]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub roles: HashMap<RoleId, String>,
    #[serde(default)]
    pub actors: Vec<DirectoryActor>,
}

/// Static identity and role directory, loaded from YAML.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    roles: HashMap<RoleId, String>,
    actors: HashMap<ActorId, DirectoryActor>,
    tokens: HashMap<String, ActorId>,
}

impl StaticDirectory {
    pub fn new(file: DirectoryFile) -> Self {
        let mut tokens = HashMap::new();
        let mut actors = HashMap::new();
        for actor in file.actors {
            for token in &actor.tokens {
                tokens.insert(token.clone(), actor.id.clone());
            }
            actors.insert(actor.id.clone(), actor);
        }
        Self {
            roles: file.roles,
            actors,
            tokens,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: DirectoryFile = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Validation(format!("invalid directory file: {e}")))?;
        Ok(Self::new(file))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Validation(format!("cannot read directory file {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }
}

#[async_trait]
impl ActorResolver for StaticDirectory {
    async fn resolve(&self, credential: &str) -> Result<Option<Actor>> {
        Ok(self
            .tokens
            .get(credential)
            .and_then(|id| self.actors.get(id))
            .map(|entry| Actor {
                id: entry.id.clone(),
                roles: entry.roles.clone(),
                admin: entry.admin,
            }))
    }

    async fn display_name(&self, actor_id: &str) -> Result<Option<String>> {
        Ok(self.actors.get(actor_id).and_then(|a| a.name.clone()))
    }
}

#[async_trait]
impl RoleDirectory for StaticDirectory {
    async fn resolve_role_name(&self, role_id: &str) -> Result<Option<String>> {
        Ok(self.roles.get(role_id).cloned())
    }
}
