use std::sync::Arc;

use serde::Serialize;

use crate::{
    constants::{INPUT_DIR, INPUT_EXTENSION, OUTPUT_DIR, OUTPUT_EXTENSION},
    core::{
        domain::{ArtifactPath, Language, Scope, SourceArtifact},
        errors::IntakeError,
        traits::{ids::IdGenerator, store::SourceStore},
    },
};

/// Where a saved file ended up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SavedFile {
    #[serde(rename = "filename")]
    pub file_name: String,
    pub path: String,
    pub extension: String,
}

impl From<&ArtifactPath> for SavedFile {
    fn from(path: &ArtifactPath) -> Self {
        Self {
            file_name: path.file_name().to_string(),
            path: format!("{}/", path.dir()),
            extension: path.extension().unwrap_or_default().to_string(),
        }
    }
}

/// Stores fixtures, scripts and reference outputs. Names are never reused.
#[derive(Clone, Debug)]
pub struct Intake {
    store: Arc<dyn SourceStore>,
    ids: Arc<dyn IdGenerator>,
}

impl Intake {
    pub fn new(store: Arc<dyn SourceStore>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, ids }
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn save_input(
        &self,
        content: &[u8],
        file_name: Option<&str>,
    ) -> Result<SavedFile, IntakeError> {
        if content.is_empty() {
            return Err(IntakeError::EmptyContent);
        }
        let name = self.name_or_default(file_name, "input")?;
        let path = ArtifactPath::input(&format!("{name}.{INPUT_EXTENSION}"));

        self.store.ensure_dir(&ArtifactPath::new(INPUT_DIR)).await?;
        self.write_new(&path, content).await?;
        Ok(SavedFile::from(&path))
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn save_script(
        &self,
        extension: &str,
        content: &[u8],
        file_name: Option<&str>,
        scope: &Scope,
    ) -> Result<SourceArtifact, IntakeError> {
        let language: Language = extension.parse()?;
        if content.is_empty() {
            return Err(IntakeError::EmptyContent);
        }
        validate_segment(&scope.quiz)?;
        validate_segment(&scope.problem)?;
        let name = self.name_or_default(file_name, "script")?;
        let file_name = format!("{name}.{}", language.extension());
        let path = ArtifactPath::script(scope, &file_name);

        self.store.ensure_dir(&ArtifactPath::scripts_dir(scope)).await?;
        self.write_new(&path, content).await?;
        Ok(SourceArtifact {
            scope: scope.clone(),
            file_name,
            language,
            content: content.to_vec(),
        })
    }

    /// Unlike inputs, an empty output is legitimate. Only a missing one is not.
    #[tracing::instrument(skip(self, content))]
    pub async fn save_output(
        &self,
        content: Option<&[u8]>,
        file_name: Option<&str>,
    ) -> Result<SavedFile, IntakeError> {
        let content = content.ok_or(IntakeError::EmptyContent)?;
        let name = self.name_or_default(file_name, "output")?;
        let path = ArtifactPath::output(&format!("{name}.{OUTPUT_EXTENSION}"));

        self.store.ensure_dir(&ArtifactPath::new(OUTPUT_DIR)).await?;
        self.write_new(&path, content).await?;
        Ok(SavedFile::from(&path))
    }

    fn name_or_default(
        &self,
        file_name: Option<&str>,
        prefix: &str,
    ) -> Result<String, IntakeError> {
        match file_name {
            Some(name) => {
                validate_segment(name)?;
                Ok(name.to_string())
            }
            None => Ok(format!("{prefix}_{}", self.ids.next_id())),
        }
    }

    async fn write_new(&self, path: &ArtifactPath, content: &[u8]) -> Result<(), IntakeError> {
        if self.store.exists(path).await? {
            tracing::warn!("Refusing to overwrite {}", path);
            return Err(IntakeError::AlreadyExists {
                path: path.to_string(),
            });
        }
        self.store.write(path, content).await?;
        tracing::debug!("Saved {} ({} bytes)", path, content.len());
        Ok(())
    }
}

fn validate_segment(name: &str) -> Result<(), IntakeError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(IntakeError::InvalidFileName {
            file_name: name.to_string(),
        });
    }
    Ok(())
}
