//! Per-session data type permissions.

use crate::message::DataType;
use serde::{Deserialize, Serialize};

/// Which data types a party may send, and whether it may request stream IDs.
///
/// A session holds two of these: one for the master and one for slaves.
/// Control messages are never governed by a constraint; see
/// [`Constraint::is_allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Constraint {
    pub text_data_type_allowed: bool,
    pub binary_data_type_allowed: bool,
    pub audio_data_type_allowed: bool,
    pub video_data_type_allowed: bool,
    pub request_stream_id_allowed: bool,
}

impl Default for Constraint {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl Constraint {
    /// Everything permitted.
    #[must_use]
    pub const fn allow_all() -> Self {
        Self {
            text_data_type_allowed: true,
            binary_data_type_allowed: true,
            audio_data_type_allowed: true,
            video_data_type_allowed: true,
            request_stream_id_allowed: true,
        }
    }

    /// Nothing permitted.
    #[must_use]
    pub const fn deny_all() -> Self {
        Self {
            text_data_type_allowed: false,
            binary_data_type_allowed: false,
            audio_data_type_allowed: false,
            video_data_type_allowed: false,
            request_stream_id_allowed: false,
        }
    }

    /// Whether this constraint's flag for `data_type` is set.
    ///
    /// Always `false` for [`DataType::Control`]: control traffic is admitted
    /// by the session rule, not by a constraint flag.
    #[must_use]
    pub const fn is_allowed(&self, data_type: DataType) -> bool {
        match data_type {
            DataType::Text => self.text_data_type_allowed,
            DataType::Binary => self.binary_data_type_allowed,
            DataType::Audio => self.audio_data_type_allowed,
            DataType::Video => self.video_data_type_allowed,
            DataType::Control => false,
        }
    }

    /// Set the flag for `data_type`. Control has no flag and is ignored.
    pub fn set_allowed(&mut self, data_type: DataType, allowed: bool) {
        match data_type {
            DataType::Text => self.text_data_type_allowed = allowed,
            DataType::Binary => self.binary_data_type_allowed = allowed,
            DataType::Audio => self.audio_data_type_allowed = allowed,
            DataType::Video => self.video_data_type_allowed = allowed,
            DataType::Control => {}
        }
    }

    /// Copy every flag from `other`.
    pub fn set_from(&mut self, other: &Constraint) {
        *self = *other;
    }
}
