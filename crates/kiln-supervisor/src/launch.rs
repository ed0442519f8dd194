use std::path::{Path, PathBuf};

use kiln_process::ServerType;

use crate::error::ResolutionError;

/// JVM heap bounds, in MiB. Only meaningful for jar-based servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBounds {
    pub xms_mb: u32,
    pub xmx_mb: u32,
}

impl MemoryBounds {
    pub fn new(xms_mb: u32, xmx_mb: u32) -> Self {
        Self { xms_mb, xmx_mb }
    }

    fn validate(self) -> Result<(), ResolutionError> {
        if self.xms_mb == 0 || self.xms_mb > self.xmx_mb {
            return Err(ResolutionError::InvalidMemoryBounds {
                xms: self.xms_mb,
                xmx: self.xmx_mb,
            });
        }
        Ok(())
    }
}

impl Default for MemoryBounds {
    fn default() -> Self {
        Self {
            xms_mb: 1024,
            xmx_mb: 2048,
        }
    }
}

/// Concrete command line produced by resolution, consumed once at spawn.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Whether stdin is piped. Native server binaries may not read console
    /// input, so they get no stdin pipe at all.
    pub interactive: bool,
    /// The resolved server artifact. Re-checked at spawn time because it can
    /// disappear between resolution and spawn.
    pub server_file: PathBuf,
}

/// Fixed artifact name for each non-custom server type.
pub fn server_file_name(server_type: ServerType) -> Option<&'static str> {
    match server_type {
        ServerType::Vanilla => Some("server.jar"),
        ServerType::Fabric => Some("fabric-server-launch.jar"),
        ServerType::Forge => Some("forge-server.jar"),
        ServerType::Paper => Some("papermc.jar"),
        ServerType::PocketEdition => Some("pocketmine-mp.phar"),
        ServerType::Custom => None,
    }
}

/// Maps a server-type selector plus configuration to a spawnable command
/// line. Purely local: the only I/O is the existence check on the artifact.
pub fn resolve_launch_spec(
    server_dir: &Path,
    server_type: &str,
    custom_path: &str,
    memory: MemoryBounds,
) -> Result<LaunchSpec, ResolutionError> {
    let ty = ServerType::parse(server_type)
        .ok_or_else(|| ResolutionError::UnknownType(server_type.to_string()))?;
    memory.validate()?;

    let file = match server_file_name(ty) {
        Some(name) => server_dir.join(name),
        None => {
            let trimmed = custom_path.trim();
            if trimmed.is_empty() {
                return Err(ResolutionError::FileNotFound(PathBuf::new()));
            }
            let p = PathBuf::from(trimmed);
            if p.is_absolute() { p } else { server_dir.join(p) }
        }
    };

    if !file.is_file() {
        return Err(ResolutionError::FileNotFound(file));
    }

    let working_dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let spec = match ext.as_deref() {
        Some("jar") => LaunchSpec {
            program: PathBuf::from("java"),
            args: vec![
                format!("-Xms{}M", memory.xms_mb),
                format!("-Xmx{}M", memory.xmx_mb),
                "-jar".to_string(),
                file.display().to_string(),
                "nogui".to_string(),
            ],
            working_dir,
            interactive: true,
            server_file: file,
        },
        Some("phar") => LaunchSpec {
            program: PathBuf::from("php"),
            args: vec![file.display().to_string()],
            working_dir,
            interactive: true,
            server_file: file,
        },
        // Anything else is treated as a compiled server binary: run it
        // as-is and do not open stdin.
        _ => LaunchSpec {
            program: file.clone(),
            args: Vec::new(),
            working_dir,
            interactive: false,
            server_file: file,
        },
    };

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn vanilla_jar_resolves_java_with_memory_flags() {
        let dir = tempfile::tempdir().unwrap();
        let jar = touch(dir.path(), "server.jar");

        let spec =
            resolve_launch_spec(dir.path(), "Vanilla", "", MemoryBounds::new(1024, 2048)).unwrap();

        assert_eq!(spec.program, PathBuf::from("java"));
        assert_eq!(
            spec.args,
            vec![
                "-Xms1024M".to_string(),
                "-Xmx2048M".to_string(),
                "-jar".to_string(),
                jar.display().to_string(),
                "nogui".to_string(),
            ]
        );
        assert!(spec.interactive);
        assert_eq!(spec.working_dir, dir.path());
        assert_eq!(spec.server_file, jar);
    }

    #[test]
    fn custom_with_empty_path_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            resolve_launch_spec(dir.path(), "Custom", "  ", MemoryBounds::default()).unwrap_err();
        assert!(matches!(err, ResolutionError::FileNotFound(_)));
    }

    #[test]
    fn unknown_selector_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_launch_spec(dir.path(), "Skyblock", "", MemoryBounds::default())
            .unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownType(_)));
    }

    #[test]
    fn inverted_memory_bounds_fail_before_the_file_check() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "server.jar");

        let err = resolve_launch_spec(dir.path(), "Vanilla", "", MemoryBounds::new(2048, 1024))
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::InvalidMemoryBounds { xms: 2048, xmx: 1024 }
        ));

        let err = resolve_launch_spec(dir.path(), "Vanilla", "", MemoryBounds::new(0, 1024))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidMemoryBounds { xms: 0, .. }));
    }

    #[test]
    fn missing_artifact_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            resolve_launch_spec(dir.path(), "Fabric", "", MemoryBounds::default()).unwrap_err();
        match err {
            ResolutionError::FileNotFound(p) => {
                assert_eq!(p, dir.path().join("fabric-server-launch.jar"));
            }
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn phar_goes_through_the_php_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let phar = touch(dir.path(), "pocketmine-mp.phar");

        let spec = resolve_launch_spec(
            dir.path(),
            "Pocket Edition (PHP)",
            "",
            MemoryBounds::default(),
        )
        .unwrap();

        assert_eq!(spec.program, PathBuf::from("php"));
        assert_eq!(spec.args, vec![phar.display().to_string()]);
        assert!(spec.interactive);
    }

    #[test]
    fn native_binary_runs_directly_without_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let bin = touch(dir.path(), "bedrock_server");

        let spec = resolve_launch_spec(
            dir.path(),
            "Custom",
            "bedrock_server",
            MemoryBounds::default(),
        )
        .unwrap();

        assert_eq!(spec.program, bin);
        assert!(spec.args.is_empty());
        assert!(!spec.interactive);
        assert_eq!(spec.working_dir, dir.path());
    }

    #[test]
    fn paper_maps_to_its_fixed_jar() {
        assert_eq!(server_file_name(kiln_process::ServerType::Paper), Some("papermc.jar"));
        assert_eq!(server_file_name(kiln_process::ServerType::Custom), None);
    }
}
