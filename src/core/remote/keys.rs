//! Remote key scheme for one session.

use crate::core::derive::Variant;
use crate::core::session::{derived_relative, relative_key};
use crate::error::SessionError;
use std::path::Path;

const GALLERY_FILE: &str = "index.html";
const BUNDLE_FILE: &str = "share.zip";
const ENHANCED_DIR: &str = "enhanced";

/// `<prefix><session>/...` keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    base: String,
}

impl SessionKeys {
    /// `prefix` must end with `/` (checked by config validation)
    pub fn new(prefix: &str, session_id: &str) -> Self {
        Self {
            base: format!("{}{}/", prefix, session_id),
        }
    }

    /// Every key of the session starts with this
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn gallery(&self) -> String {
        format!("{}{}", self.base, GALLERY_FILE)
    }

    pub fn bundle(&self) -> String {
        format!("{}{}", self.base, BUNDLE_FILE)
    }

    /// Key of a derived variant of the original at `relative`
    pub fn variant(&self, variant: Variant, relative: &Path) -> Result<String, SessionError> {
        self.under(variant.dir_name(), relative)
    }

    /// Where the enhancement service drops its version of the share image
    pub fn enhanced(&self, relative: &Path) -> Result<String, SessionError> {
        self.under(ENHANCED_DIR, relative)
    }

    fn under(&self, dir: &str, relative: &Path) -> Result<String, SessionError> {
        Ok(format!(
            "{}{}/{}",
            self.base,
            dir,
            relative_key(&derived_relative(relative)?)
        ))
    }
}
