use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Port the dashboard listens on when neither `--port` nor `PORT` is given.
pub const DEFAULT_PORT: u16 = 3456;
/// Flag that tells the worker script it is being driven by the observer.
pub const WORKER_FLAG: &str = "--worker";

const WORKER_SCRIPT: &str = "unpossible.sh";
const DASHBOARD_ASSET: &str = "observer/index.html";
const PRD_INDEX: &str = ".prd-files";

/// Where things live for one observer process.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Root of the Unpossible installation; exported to the worker as
    /// `UNPOSSIBLE_HOME`.
    pub package_dir: PathBuf,
    /// Directory holding the worker script.
    pub script_dir: PathBuf,
    /// The user's project. The worker runs here and the PRD index is read here.
    pub project_dir: PathBuf,
    /// Interpreter used to run the worker script.
    pub shell: PathBuf,
    pub port: u16,
}

impl ObserverConfig {
    /// Resolve the layout from an optional `UNPOSSIBLE_HOME` override.
    ///
    /// With an override the script is looked up under `<home>/lib`; otherwise
    /// the package root is the parent of the directory holding this binary and
    /// the script sits directly in it.
    pub fn resolve(home: Option<PathBuf>, port: u16) -> Result<Self> {
        let project_dir =
            std::env::current_dir().context("failed to read the current directory")?;
        let (package_dir, script_dir) = match home {
            Some(home) => {
                let script_dir = home.join("lib");
                (home, script_dir)
            }
            None => {
                let package_dir = default_package_dir()?;
                (package_dir.clone(), package_dir)
            }
        };
        Ok(Self {
            package_dir,
            script_dir,
            project_dir,
            shell: PathBuf::from("bash"),
            port,
        })
    }

    pub fn worker_script(&self) -> PathBuf {
        self.script_dir.join(WORKER_SCRIPT)
    }

    pub fn dashboard_asset(&self) -> PathBuf {
        self.package_dir.join(DASHBOARD_ASSET)
    }

    pub fn prd_index(&self) -> PathBuf {
        self.project_dir.join(PRD_INDEX)
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

fn default_package_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the observer binary")?;
    let bin_dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(bin_dir.parent().unwrap_or(bin_dir).to_path_buf())
}

/// Drop the reserved worker flag from caller-supplied arguments.
pub fn strip_worker_flag(args: Vec<String>) -> Vec<String> {
    args.into_iter().filter(|arg| arg != WORKER_FLAG).collect()
}
