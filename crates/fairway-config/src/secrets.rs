//! Runtime secret resolution.
//!
//! Config stores only the env var NAME of the database URL
//! (`store.database_url_env`). It is resolved once at startup and the result
//! is passed into constructors. Values are redacted in `Debug` output and
//! never appear in error messages.
//!
//! | Mode     | Required        |
//! |----------|-----------------|
//! | SYNC     | database URL    |
//! | DRY_RUN  | nothing         |

use anyhow::{bail, Result};

use crate::{ConfigMode, LoaderConfig};

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// `None` if the named env var was absent or blank.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve secrets for `mode` using `lookup` (usually `|k| std::env::var(k).ok()`).
///
/// Errors name the missing env var, never a value.
pub fn resolve_secrets<F>(cfg: &LoaderConfig, mode: ConfigMode, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let var = cfg.store.database_url_env.trim();
    let database_url = lookup(var).filter(|v| !v.trim().is_empty());

    if mode == ConfigMode::Sync && database_url.is_none() {
        bail!(
            "SECRETS_MISSING mode={}: required env var '{}' (database url) is not set or empty",
            mode.as_str(),
            var
        );
    }

    Ok(ResolvedSecrets { database_url })
}
