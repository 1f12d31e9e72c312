//! The last applied connection set, kept on disk between runs.

use std::path::Path;

use crate::error::{ConduitError, Result};
use crate::models::ConnectionSet;
use crate::service::running_info::write_private_file;

/// Reads the applied set; nothing applied yet reads as empty.
pub fn load_snapshot(path: &Path) -> Result<ConnectionSet> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConnectionSet::new()),
        Err(e) => Err(ConduitError::file_system(path, e)),
    }
}

/// Writes the applied set. Connection configs may carry credentials, so the
/// file is private to the owner.
pub fn save_snapshot(path: &Path, applied: &ConnectionSet) -> Result<()> {
    write_private_file(path, &serde_json::to_vec_pretty(applied)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::models::ConnectionConfig;

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("connections.json");
        assert!(load_snapshot(&path).expect("load").is_empty());

        let set = ConnectionSet::from_configs(vec![
            ConnectionConfig::new("aws", "aws").with_config(json!({"regions": ["*"]})),
        ])
        .expect("set");
        save_snapshot(&path, &set).expect("save");
        assert_eq!(load_snapshot(&path).expect("load"), set);
    }
}
