//! # Metadata Module
//!
//! Capture metadata read from EXIF, used to order and caption the gallery
//! and to orient derived images.
//!
//! ## Extracted Fields
//! - Capture time (DateTimeOriginal, falling back to DateTime)
//! - Camera make and model
//! - Orientation (1-8)
//!
//! Missing or unreadable EXIF yields an empty `CaptureMetadata`; it is
//! never an error.

use chrono::NaiveDateTime;
use exif::{In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::Path;

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// What the camera recorded about a shot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Camera-local capture time; EXIF carries no zone
    pub captured_at: Option<NaiveDateTime>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    /// Image orientation (1-8, where 1 is normal)
    pub orientation: Option<u16>,
}

impl CaptureMetadata {
    /// "Canon EOS R5", without repeating the make when the model already has it
    pub fn camera_label(&self) -> Option<String> {
        match (&self.camera_make, &self.camera_model) {
            (Some(make), Some(model)) => {
                if model.to_lowercase().starts_with(&make.to_lowercase()) {
                    Some(model.clone())
                } else {
                    Some(format!("{} {}", make, model))
                }
            }
            (None, Some(model)) => Some(model.clone()),
            (Some(make), None) => Some(make.clone()),
            (None, None) => None,
        }
    }
}

/// Extract capture metadata from a file on disk
pub fn extract_metadata(path: &Path) -> CaptureMetadata {
    match File::open(path) {
        Ok(file) => read_exif(&mut BufReader::new(file)),
        Err(_) => CaptureMetadata::default(),
    }
}

/// Extract capture metadata from an already-read image
pub fn extract_metadata_from_bytes(bytes: &[u8]) -> CaptureMetadata {
    read_exif(&mut Cursor::new(bytes))
}

fn read_exif<R: BufRead + Seek>(reader: &mut R) -> CaptureMetadata {
    let mut metadata = CaptureMetadata::default();

    let exif = match Reader::new().read_from_container(reader) {
        Ok(exif) => exif,
        Err(_) => return metadata,
    };

    metadata.captured_at = [Tag::DateTimeOriginal, Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, In::PRIMARY))
        .filter_map(|field| get_string_value(&field.value))
        .find_map(|s| NaiveDateTime::parse_from_str(&s, EXIF_DATE_FORMAT).ok());

    if let Some(field) = exif.get_field(Tag::Make, In::PRIMARY) {
        metadata.camera_make = get_string_value(&field.value);
    }
    if let Some(field) = exif.get_field(Tag::Model, In::PRIMARY) {
        metadata.camera_model = get_string_value(&field.value);
    }
    if let Some(field) = exif.get_field(Tag::Orientation, In::PRIMARY) {
        if let Value::Short(ref vec) = field.value {
            metadata.orientation = vec.first().copied().filter(|o| (1..=8).contains(o));
        }
    }

    metadata
}

/// Helper to extract string from EXIF ASCII value
fn get_string_value(value: &Value) -> Option<String> {
    if let Value::Ascii(ref vec) = value {
        if let Some(bytes) = vec.first() {
            if let Ok(s) = std::str::from_utf8(bytes) {
                let trimmed = s.trim_end_matches('\0').trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}
