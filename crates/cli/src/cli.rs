use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};

/// clamguard: on-access virus scanning that stays out of the way
///
/// clamguard watches directories for new and changed files, hands them to
/// clamd for scanning and quarantines what it finds. A time-of-day profile
/// caps how much CPU clamd may use, and scanning is held back entirely while
/// the cap is below the configured floor.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/clamguard/config.toml` and `/etc/clamguard/config.d/*.toml`,
    /// where the latter being a glob pattern. If they don't exist, the default
    /// configuration is used.
    #[arg(short, long, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// Track limits without running the limiter.
    ///
    /// The governor still evaluates its profile and pauses scanning, but
    /// never touches the clamd process.
    #[arg(short, long)]
    pub mock: bool,

    /// Disable the CPU governor regardless of configuration.
    #[arg(long)]
    pub no_governor: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if self.mock {
            config.governor.mocking = true;
        }
        if self.no_governor {
            config.governor.enabled = false;
        }
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.is_file() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn overrides_win_over_config() {
        let cli = Cli::parse_from(["clamguard", "--mock", "--no-governor"]);
        let mut config = config::Config::default();
        cli.apply_overrides(&mut config);
        assert!(config.governor.mocking);
        assert!(!config.governor.enabled);

        let cli = Cli::parse_from(["clamguard"]);
        let mut config = config::Config::default();
        cli.apply_overrides(&mut config);
        assert!(!config.governor.mocking);
        assert!(config.governor.enabled);
    }

    #[test]
    fn conffile_must_exist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(Cli::try_parse_from(["clamguard", "-c", path.to_str().unwrap()]).is_err());

        std::fs::write(&path, "").unwrap();
        let cli = Cli::try_parse_from(["clamguard", "-c", path.to_str().unwrap()]).unwrap();
        assert_eq!(cli.conffile, Some(path));
    }

    proptest! {
        #[test]
        fn test_validate_file(name in "[a-z]{1,12}", create in any::<bool>()) {
            let dir = tempdir().unwrap();
            let path = dir.path().join(&name);
            if create {
                std::fs::write(&path, "").unwrap();
            }
            let path_str = path.to_str().unwrap();
            match validate_file(path_str) {
                Ok(found) => {
                    prop_assert!(create);
                    prop_assert_eq!(found, path);
                }
                Err(err) => {
                    prop_assert!(!create);
                    prop_assert_eq!(err, format!("File not found: {:?}", path));
                }
            }
        }
    }
}
