use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub fn path(dir: &Path, task: &str) -> PathBuf {
    dir.join(format!("{}.json", task))
}

pub fn exists(dir: &Path, task: &str) -> bool {
    path(dir, task).is_file()
}

/// Load the published parameters of one challenge from `dir/<task>.json`.
pub fn load<T: DeserializeOwned>(dir: &Path, task: &str) -> Result<T> {
    let path = path(dir, task);
    let file = File::open(&path).with_context(|| format!("Unable to open {}", path.display()))?;
    let challenge = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Unable to parse {}", path.display()))?;
    Ok(challenge)
}

/// Resolve a file named in a challenge file relative to the resources directory.
pub fn resource(dir: &Path, name: &str) -> PathBuf {
    let name = Path::new(name);
    if name.is_absolute() {
        name.to_path_buf()
    } else {
        dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;

    #[derive(Deserialize)]
    struct Remote {
        host: String,
        port: u16,
    }

    #[test]
    fn loads_challenge_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("demo.json"),
            r#"{ "host": "ctfi.ng", "port": 31555 }"#,
        )
        .unwrap();

        assert!(exists(dir.path(), "demo"));
        assert!(!exists(dir.path(), "missing"));
        let remote: Remote = load(dir.path(), "demo").unwrap();
        assert_eq!((remote.host.as_str(), remote.port), ("ctfi.ng", 31555));

        fs::write(dir.path().join("broken.json"), "{").unwrap();
        assert!(load::<Remote>(dir.path(), "broken").is_err());
    }

    #[test]
    fn resources_are_relative_to_dir() {
        let dir = Path::new("resources");
        assert_eq!(resource(dir, "log.enc"), Path::new("resources/log.enc"));
        assert_eq!(resource(dir, "/tmp/log.enc"), Path::new("/tmp/log.enc"));
    }
}
