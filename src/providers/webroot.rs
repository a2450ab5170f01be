use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;

use super::http01::ACME_CHALLENGE_PREFIX;
use crate::challenge::{ChallengeProvider, ProviderError};

/// Answers HTTP-01 challenges by dropping token files into the document
/// root of a web server the caller already runs.
#[derive(Debug)]
pub struct WebRootProvider {
    root: PathBuf,
}

impl WebRootProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ProviderError> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(ProviderError::WebRootMissing(root.to_owned()));
        }
        Ok(Self {
            root: root.to_owned(),
        })
    }

    fn challenge_file(&self, token: &str) -> PathBuf {
        self.root
            .join(ACME_CHALLENGE_PREFIX.trim_start_matches('/'))
            .join(token)
    }
}

impl ChallengeProvider for WebRootProvider {
    fn present(&mut self, domain: &str, token: &str, key_auth: &str) -> Result<(), ProviderError> {
        let file = self.challenge_file(token);
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&file, key_auth)?;
        debug!("Wrote HTTP-01 challenge for {} to {:?}", domain, file);
        Ok(())
    }

    fn clean_up(&mut self, _: &str, token: &str, _: &str) -> Result<(), ProviderError> {
        fs::remove_file(self.challenge_file(token))?;
        Ok(())
    }
}
