use std::path::Path;

use anyhow::Context;
use kiln_process::ServerType;
use tokio::io::AsyncWriteExt;

pub const PROFILE_FILE: &str = "profile.json";

/// Last-used launch configuration, persisted as a flat JSON document.
///
/// There is no schema versioning: unknown keys are ignored and missing keys
/// fall back to their defaults, so older and newer documents both load.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Profile {
    pub server_type: ServerType,
    pub custom_path: String,
    pub xms: u32,
    pub xmx: u32,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            server_type: ServerType::Vanilla,
            custom_path: String::new(),
            xms: 1024,
            xmx: 2048,
        }
    }
}

/// A missing file yields the defaults; a malformed document is an error the
/// caller can show the operator.
pub async fn load(path: &Path) -> anyhow::Result<Profile> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(v) => v,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Profile::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read profile {}", path.display()));
        }
    };
    serde_json::from_str(&raw).with_context(|| format!("parse profile {}", path.display()))
}

pub async fn save(path: &Path, profile: &Profile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("create profile dir")?;
    }

    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(profile).context("serialize profile")?;
    let mut f = tokio::fs::File::create(&tmp)
        .await
        .context("create profile.json.tmp")?;
    f.write_all(&data).await.context("write profile.json.tmp")?;
    f.flush().await.ok();
    tokio::fs::rename(&tmp, path)
        .await
        .context("persist profile.json")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let profile = load(&dir.path().join(PROFILE_FILE)).await.unwrap();
        assert_eq!(profile, Profile::default());
        assert_eq!(profile.server_type, ServerType::Vanilla);
        assert_eq!((profile.xms, profile.xmx), (1024, 2048));
        assert!(profile.custom_path.is_empty());
    }

    #[tokio::test]
    async fn partial_document_fills_the_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROFILE_FILE);
        std::fs::write(&path, br#"{"xmx": 4096, "ignored_key": true}"#).unwrap();

        let profile = load(&path).await.unwrap();
        assert_eq!(profile.server_type, ServerType::Vanilla);
        assert_eq!(profile.xms, 1024);
        assert_eq!(profile.xmx, 4096);
    }

    #[tokio::test]
    async fn save_then_load_preserves_the_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROFILE_FILE);
        let profile = Profile {
            server_type: ServerType::Custom,
            custom_path: "mods/papermc.jar".to_string(),
            xms: 512,
            xmx: 8192,
        };

        save(&path, &profile).await.unwrap();
        assert_eq!(load(&path).await.unwrap(), profile);
    }

    #[tokio::test]
    async fn malformed_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROFILE_FILE);
        std::fs::write(&path, b"{not json").unwrap();
        assert!(load(&path).await.is_err());
    }
}
