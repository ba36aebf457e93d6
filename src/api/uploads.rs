//! Buffered multipart forms.

use axum::extract::Multipart;
use bytes::Bytes;
use std::collections::HashMap;

use super::error::AppError;
use crate::images;

/// One uploaded file
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// A multipart body read fully into memory. Files must declare an image
/// content type; everything else is kept as text.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() {
                let content_type = field.content_type().map(str::to_string);
                images::check_content_type(content_type.as_deref())?;
                let bytes = field.bytes().await?;
                form.files.push(UploadedFile {
                    field: name,
                    content_type,
                    bytes,
                });
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field == field)
    }

    pub fn files_named<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a UploadedFile> + 'a {
        self.files.iter().filter(move |f| f.field == field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}
