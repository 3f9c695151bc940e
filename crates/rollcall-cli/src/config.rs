use anyhow::{Context, Result};
use rollcall_core::annotate::DEFAULT_DOWNSCALE;
use rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::session::DEFAULT_PROCESS_EVERY;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Tool configuration. Paths are injected into every component from here.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Encoding store file.
    pub store_path: PathBuf,
    /// Where enrollment photos are kept.
    pub photos_dir: PathBuf,
    /// Attendance CSV.
    pub ledger_path: PathBuf,
    /// Maximum Euclidean distance accepted as a match.
    ///
    /// The 0.6 default is the usual cut-off for 128-d dlib encodings. The
    /// bundled ArcFace backend emits unit-length 512-d vectors, where 0.6
    /// means cosine similarity of at least 0.82 and most genuine faces fall
    /// short. Around 1.1 (cosine 0.4) suits that backend.
    pub match_threshold: f32,
    /// Analyze one frame out of this many in live sessions.
    pub process_every: u32,
    /// Analysis frames are shrunk by this factor per dimension.
    pub downscale: u32,
    /// Length of the enrollment capture.
    pub enroll_capture_secs: u64,
}

/// On-disk TOML layout; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    model_dir: Option<PathBuf>,
    store_path: Option<PathBuf>,
    photos_dir: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    process_every: Option<u32>,
    downscale: Option<u32>,
    enroll_capture_secs: Option<u64>,
}

impl Config {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            model_dir: data_dir.join("models"),
            store_path: data_dir.join("faces.json"),
            photos_dir: data_dir.join("photos"),
            ledger_path: data_dir.join("attendance.csv"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            process_every: DEFAULT_PROCESS_EVERY,
            downscale: DEFAULT_DOWNSCALE,
            enroll_capture_secs: 5,
        }
    }

    /// Defaults, then the config file (if any), then `ROLLCALL_*` variables.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::with_data_dir(&default_data_dir());

        let file = explicit_file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from));
        match file {
            Some(path) => config.apply_file(&path)?,
            None => {
                let path = default_config_file();
                if path.exists() {
                    config.apply_file(&path)?;
                }
            }
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: FileConfig =
            toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))?;
        self.merge(file);
        tracing::debug!(path = %path.display(), "applied config file");
        Ok(())
    }

    fn merge(&mut self, file: FileConfig) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(v) = file.$field { self.$field = v; })*
            };
        }
        take!(
            camera_device,
            capture_width,
            capture_height,
            model_dir,
            store_path,
            photos_dir,
            ledger_path,
            match_threshold,
            process_every,
            downscale,
            enroll_capture_secs
        );
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        for (key, slot) in [
            ("ROLLCALL_MODEL_DIR", &mut self.model_dir),
            ("ROLLCALL_STORE_PATH", &mut self.store_path),
            ("ROLLCALL_PHOTOS_DIR", &mut self.photos_dir),
            ("ROLLCALL_LEDGER_PATH", &mut self.ledger_path),
        ] {
            if let Ok(v) = std::env::var(key) {
                *slot = PathBuf::from(v);
            }
        }
        self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.process_every = env_parse("ROLLCALL_PROCESS_EVERY", self.process_every);
        self.downscale = env_parse("ROLLCALL_DOWNSCALE", self.downscale);
        self.enroll_capture_secs = env_parse("ROLLCALL_ENROLL_CAPTURE_SECS", self.enroll_capture_secs);
        self.capture_width = env_parse("ROLLCALL_CAPTURE_WIDTH", self.capture_width);
        self.capture_height = env_parse("ROLLCALL_CAPTURE_HEIGHT", self.capture_height);
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.match_threshold.is_finite() && self.match_threshold > 0.0,
            "match_threshold must be a positive number, got {}",
            self.match_threshold
        );
        anyhow::ensure!(self.process_every >= 1, "process_every must be at least 1");
        anyhow::ensure!(self.downscale >= 1, "downscale must be at least 1");
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rollcall")
}

fn default_config_file() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall/config.toml")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::with_data_dir(Path::new("/data"));
        assert_eq!(c.store_path, PathBuf::from("/data/faces.json"));
        assert_eq!(c.photos_dir, PathBuf::from("/data/photos"));
        assert_eq!(c.ledger_path, PathBuf::from("/data/attendance.csv"));
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.process_every, 2);
        assert_eq!(c.downscale, 4);
        assert_eq!(c.enroll_capture_secs, 5);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_subset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "match_threshold = 0.5\nledger_path = \"/srv/sheet.csv\"\n").unwrap();

        let mut c = Config::with_data_dir(Path::new("/data"));
        c.apply_file(&path).unwrap();
        assert_eq!(c.match_threshold, 0.5);
        assert_eq!(c.ledger_path, PathBuf::from("/srv/sheet.csv"));
        assert_eq!(c.store_path, PathBuf::from("/data/faces.json"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.5\n").unwrap();
        let mut c = Config::with_data_dir(Path::new("/data"));
        assert!(c.apply_file(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_amortization() {
        let mut c = Config::with_data_dir(Path::new("/data"));
        c.process_every = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("ROLLCALL_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse("ROLLCALL_TEST_GARBAGE", 7u32), 7);
        std::env::set_var("ROLLCALL_TEST_VALUE", "3");
        assert_eq!(env_parse("ROLLCALL_TEST_VALUE", 7u32), 3);
    }
}
