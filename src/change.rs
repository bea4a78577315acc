use crate::util::{Result, TrekError};
use std::path::Path;
use tracing::info;

/// Compares model content against the last seen content.
///
/// One trailing newline is ignored. Empty content never counts as an update,
/// so a model that has not been authored yet cannot clobber migrations.
/// Returns whether the model was updated and the content to cache next.
pub fn check_if_updated(content: &str, cached: &str) -> (bool, String) {
    let content = content.strip_suffix('\n').unwrap_or(content);
    if content.is_empty() || content == cached {
        return (false, cached.to_string());
    }
    (true, content.to_string())
}

/// Last seen model content, scoped to one generator.
#[derive(Debug, Default, Clone)]
pub struct ChangeMarker {
    last_seen: String,
}

impl ChangeMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> &str {
        &self.last_seen
    }

    pub fn observe(&mut self, content: &str) -> bool {
        let (updated, next) = check_if_updated(content, &self.last_seen);
        if updated {
            self.last_seen = next;
            info!("Changes detected");
        }
        updated
    }

    pub fn check_if_updated(&mut self, model_path: &Path) -> Result<bool> {
        let content =
            std::fs::read_to_string(model_path).map_err(|e| TrekError::io(model_path, e))?;
        Ok(self.observe(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_content_is_an_update() {
        let (updated, cached) = check_if_updated("<dbmodel/>\n", "");
        assert!(updated);
        assert_eq!(cached, "<dbmodel/>");
    }

    #[test]
    fn trailing_newline_is_ignored() {
        let (updated, _) = check_if_updated("<dbmodel/>\n", "<dbmodel/>");
        assert!(!updated);
        let (updated, _) = check_if_updated("<dbmodel/>", "<dbmodel/>");
        assert!(!updated);
    }

    #[test]
    fn only_one_trailing_newline_is_trimmed() {
        let (updated, cached) = check_if_updated("<dbmodel/>\n\n", "<dbmodel/>");
        assert!(updated);
        assert_eq!(cached, "<dbmodel/>\n");
    }

    #[test]
    fn empty_model_is_not_an_update() {
        assert_eq!(check_if_updated("", "old"), (false, "old".to_string()));
        assert_eq!(check_if_updated("\n", ""), (false, String::new()));
    }

    #[test]
    fn second_check_without_change_is_not_an_update() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("shop.dbm");
        std::fs::write(&model, "<dbmodel><table name=\"users\"/></dbmodel>\n").unwrap();

        let mut marker = ChangeMarker::new();
        assert!(marker.check_if_updated(&model).unwrap());
        assert!(!marker.check_if_updated(&model).unwrap());

        std::fs::write(&model, "<dbmodel><table name=\"orders\"/></dbmodel>\n").unwrap();
        assert!(marker.check_if_updated(&model).unwrap());
        assert_eq!(marker.last_seen(), "<dbmodel><table name=\"orders\"/></dbmodel>");
    }

    #[test]
    fn markers_are_independent() {
        let mut first = ChangeMarker::new();
        let mut second = ChangeMarker::new();
        assert!(first.observe("model"));
        assert!(second.observe("model"));
    }

    #[test]
    fn missing_model_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChangeMarker::new()
            .check_if_updated(&dir.path().join("missing.dbm"))
            .unwrap_err();
        assert!(matches!(err, TrekError::Io { .. }));
    }
}
