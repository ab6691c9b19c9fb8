#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use tempfile::TempDir;
use tracing::{debug, warn};

const REQUEST_TOKEN_BYTES: usize = 12;

/// Random per-request token, 24 hex characters.
pub fn request_token() -> String {
    let mut bytes = [0u8; REQUEST_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(2 * REQUEST_TOKEN_BYTES), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Exclusively owned scratch directory for one request. The directory is
/// removed when the guard is closed or dropped, whichever comes first.
#[derive(Debug)]
pub struct WorkspaceDirectory {
    token: String,
    dir: TempDir,
}

impl WorkspaceDirectory {
    /// Creates `bws_<token>_XXXXXX` under `parent`. Blocking; call from a
    /// blocking context.
    pub fn create_in(parent: &Path, token: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("bws_{token}_"))
            .tempdir_in(parent)?;
        debug!(workspace = %dir.path().display(), "workspace created");
        Ok(Self {
            token: token.to_string(),
            dir,
        })
    }

    pub async fn create(parent: PathBuf, token: String) -> std::io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::create_in(&parent, &token))
            .await
            .map_err(std::io::Error::other)?
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Removes the directory and reports failure. Dropping the guard also
    /// removes it but swallows errors.
    pub async fn close(self) -> std::io::Result<()> {
        let path = self.dir.path().to_path_buf();
        let res = tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(std::io::Error::other)?;
        match &res {
            Ok(()) => debug!(workspace = %path.display(), "workspace removed"),
            Err(err) => warn!(workspace = %path.display(), error = %err, "workspace removal failed"),
        }
        res
    }
}
