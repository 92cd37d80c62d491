//! Image selection and upload tracking.
//!
//! At most one upload is in flight.  The preview reference is available as
//! soon as a file is accepted; the prediction arrives later and is attached
//! to the composition buffer only if the session has not moved on.

use std::path::{Path, PathBuf};

use crate::session::{ControllerError, ImageRef};

/// A file picked by the user, read into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedFile {
    pub name: String,
    /// Where the file came from, if it was read from disk.
    pub path: Option<PathBuf>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    /// Read `path` and guess its content type from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            content_type,
            bytes,
        })
    }

    /// Wrap bytes that did not come from disk (a paste or a drop).
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            path: None,
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    /// A local reference the UI can render before the upload finishes.
    pub fn preview(&self) -> ImageRef {
        match &self.path {
            Some(path) => ImageRef::new(format!("file://{}", path.display())),
            None => ImageRef::new(format!("upload://{}", self.name)),
        }
    }
}

/// Externally visible phase of the image pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageState {
    #[default]
    Idle,
    Uploading,
}

impl ImageState {
    pub fn label(&self) -> &'static str {
        match self {
            ImageState::Idle => "idle",
            ImageState::Uploading => "uploading",
        }
    }
}

/// An upload that has been accepted and must be sent for classification.
#[derive(Debug)]
pub struct ClassifyJob {
    pub generation: u64,
    pub file: SelectedFile,
}

/// Bookkeeping for the upload in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub generation: u64,
    pub preview: ImageRef,
}

#[derive(Debug, Default)]
pub struct ImagePipeline {
    uploading: Option<Upload>,
}

impl ImagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ImageState {
        if self.uploading.is_some() {
            ImageState::Uploading
        } else {
            ImageState::Idle
        }
    }

    /// Preview of the file being uploaded, if any.
    pub fn preview(&self) -> Option<&ImageRef> {
        self.uploading.as_ref().map(|u| &u.preview)
    }

    /// Accept a selection.  `None` (the picker was dismissed) is a no-op.
    pub fn select(
        &mut self,
        file: Option<SelectedFile>,
        generation: u64,
    ) -> Result<Option<ClassifyJob>, ControllerError> {
        let Some(file) = file else {
            return Ok(None);
        };
        if self.uploading.is_some() {
            return Err(ControllerError::InvalidState {
                action: "select an image",
                state: self.state().label(),
            });
        }
        if !file.is_image() {
            return Err(ControllerError::UnsupportedFile(format!(
                "{} ({})",
                file.name, file.content_type
            )));
        }
        if file.bytes.is_empty() {
            return Err(ControllerError::UnsupportedFile(format!(
                "{} is empty",
                file.name
            )));
        }

        let preview = file.preview();
        log::debug!("image: Idle → Uploading {preview}");
        self.uploading = Some(Upload {
            generation,
            preview,
        });
        Ok(Some(ClassifyJob { generation, file }))
    }

    /// Classification resolved (either way).
    pub fn finish(&mut self) -> Option<Upload> {
        let upload = self.uploading.take();
        if upload.is_some() {
            log::debug!("image: Uploading → Idle");
        }
        upload
    }
}
