//! Alias buckets shared by every command with the same verb.

pub(crate) const CREATE: &[&str] = &["add"];
pub(crate) const DELETE: &[&str] = &["rm", "remove"];
pub(crate) const REMOVE: &[&str] = &["rm", "del"];
pub(crate) const LIST: &[&str] = &["ls"];
pub(crate) const SHOW: &[&str] = &["get"];
pub(crate) const UPDATE: &[&str] = &["edit"];
