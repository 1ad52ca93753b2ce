//! Token lifecycle: the transient root token, stale-token cleanup, and the
//! delegated token-issuing token.
//!
//! The transient root token exists only for the span of one bootstrap run.
//! Its revocation is tied to a guard's `Drop`, so every exit path after the
//! mint (success, fatal abort, early return) revokes it. The same mechanism
//! covers the issuing token in one-shot provider mode.

use std::path::Path;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::core::client::{EngineApi, IssuedToken, TokenCreateRequest};
use crate::core::constants;
use crate::core::material::InitMaterial;
use crate::error::{Error, Result, TokenError};

/// Mints and retires tokens through the engine API.
pub struct TokenManager<'a, A: EngineApi> {
    api: &'a A,
}

impl<'a, A: EngineApi> TokenManager<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Combine the key shares into a fresh root-capability token.
    ///
    /// Failure is fatal: nothing downstream can be provisioned without it.
    pub fn regenerate_root(&self, material: &InitMaterial) -> Result<RootTokenGuard<'a, A>> {
        let token = self
            .api
            .regenerate_root(material)
            .map_err(TokenError::Regenerate)?;
        info!("generated transient root token");
        Ok(RootTokenGuard {
            api: self.api,
            token: Zeroizing::new(token),
        })
    }

    /// Revoke root-capability tokens left over from previous runs.
    ///
    /// Best-effort: prior tokens may already be expired or revoked, so
    /// individual failures are logged and skipped. Returns the number of
    /// tokens revoked.
    pub fn revoke_root_tokens(&self, active: &str) -> usize {
        self.revoke_matching(active, true)
    }

    /// Revoke non-root tokens left over from previous runs. Best-effort.
    pub fn revoke_non_root_tokens(&self, active: &str) -> usize {
        self.revoke_matching(active, false)
    }

    fn revoke_matching(&self, active: &str, want_root: bool) -> usize {
        let own_accessor = match self.api.lookup_self(active) {
            Ok(info) => info.accessor,
            Err(err) => {
                warn!(error = %err, "could not look up own token; skipping stale-token cleanup");
                return 0;
            }
        };

        let accessors = match self.api.list_accessors(active) {
            Ok(accessors) => accessors,
            Err(err) => {
                warn!(error = %err, "could not list token accessors; skipping stale-token cleanup");
                return 0;
            }
        };

        let mut revoked = 0;
        for accessor in accessors {
            if accessor == own_accessor {
                continue;
            }

            let info = match self.api.lookup_accessor(active, &accessor) {
                Ok(info) => info,
                Err(source) => {
                    let err = Error::from(TokenError::StaleRevocation { accessor, source });
                    warn!(kind = ?err.kind(), error = %err, "stale token lookup failed");
                    continue;
                }
            };
            if info.is_root() != want_root {
                continue;
            }

            match self.api.revoke_accessor(active, &accessor) {
                Ok(()) => {
                    debug!(accessor = %accessor, "revoked stale token");
                    revoked += 1;
                }
                Err(source) => {
                    let err = Error::from(TokenError::StaleRevocation { accessor, source });
                    warn!(kind = ?err.kind(), error = %err, "stale token revocation failed");
                }
            }
        }

        revoked
    }

    /// Mint a least-privilege token that can only issue further tokens, for
    /// the delegated token-provider process.
    ///
    /// The returned guard revokes the token on drop; callers running a
    /// long-lived provider call [`IssuingTokenGuard::release`] to cede
    /// freshness management to the provider instead.
    pub fn create_token_issuing_token(
        &self,
        root: &str,
    ) -> Result<(IssuedToken, IssuingTokenGuard<'a, A>)> {
        self.api
            .install_policy(
                root,
                constants::TOKEN_CREATOR_POLICY_NAME,
                constants::TOKEN_CREATOR_POLICY,
            )
            .map_err(TokenError::Issuing)?;

        let issued = self
            .api
            .create_token(
                root,
                &TokenCreateRequest {
                    display_name: "token-issuing-token".to_string(),
                    no_parent: true,
                    period: "1h".to_string(),
                    policies: vec![constants::TOKEN_CREATOR_POLICY_NAME.to_string()],
                },
            )
            .map_err(TokenError::Issuing)?;
        info!("created token-issuing token");

        let guard = IssuingTokenGuard {
            api: self.api,
            root: Zeroizing::new(root.to_string()),
            accessor: Some(issued.accessor.clone()),
        };
        Ok((issued, guard))
    }
}

/// Write the issuing token to the admin-token file the provider reads.
///
/// The parent directory is created mode 0700 and the file written 0600.
pub fn write_admin_token_file(path: &Path, token: &IssuedToken) -> Result<()> {
    let to_token_error = |source: std::io::Error| TokenError::AdminTokenFile {
        path: path.display().to_string(),
        source,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(to_token_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }
    }

    let contents = serde_json::to_vec_pretty(&token.raw)
        .map_err(|e| to_token_error(std::io::Error::other(e)))?;
    write_owner_only(path, &contents).map_err(to_token_error)?;

    debug!(path = %path.display(), "wrote admin token file");
    Ok(())
}

fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Holds the transient root token and revokes it when dropped.
pub struct RootTokenGuard<'a, A: EngineApi> {
    api: &'a A,
    token: Zeroizing<String>,
}

impl<A: EngineApi> RootTokenGuard<'_, A> {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl<A: EngineApi> std::fmt::Debug for RootTokenGuard<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootTokenGuard").finish_non_exhaustive()
    }
}

impl<A: EngineApi> Drop for RootTokenGuard<'_, A> {
    fn drop(&mut self) {
        info!("revoking transient root token");
        if let Err(err) = self.api.revoke_self(&self.token) {
            warn!(error = %err, "could not revoke transient root token");
        }
    }
}

/// Revokes the token-issuing token on drop unless released.
pub struct IssuingTokenGuard<'a, A: EngineApi> {
    api: &'a A,
    root: Zeroizing<String>,
    accessor: Option<String>,
}

impl<A: EngineApi> IssuingTokenGuard<'_, A> {
    /// Leave the token alive; a long-running provider manages it from here.
    pub fn release(mut self) {
        self.accessor = None;
    }
}

impl<A: EngineApi> Drop for IssuingTokenGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(accessor) = self.accessor.take() {
            info!("revoking token-issuing token");
            if let Err(err) = self.api.revoke_accessor(&self.root, &accessor) {
                warn!(error = %err, "could not revoke token-issuing token");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{MockEngine, MOCK_TRANSIENT_ROOT, SELF_ACCESSOR};
    use std::sync::atomic::Ordering;

    fn material() -> InitMaterial {
        InitMaterial {
            root_token: None,
            keys: vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
            threshold: 3,
            shares: 5,
        }
    }

    #[test]
    fn test_root_guard_revokes_exactly_once_on_drop() {
        let api = MockEngine::new();
        let manager = TokenManager::new(&api);

        {
            let guard = manager.regenerate_root(&material()).unwrap();
            assert_eq!(guard.token(), MOCK_TRANSIENT_ROOT);
            assert_eq!(api.call_count("revoke-self"), 0);
        }

        assert_eq!(api.call_count("revoke-self"), 1);
        assert_eq!(
            api.calls().last().unwrap(),
            &format!("revoke-self:{}", MOCK_TRANSIENT_ROOT)
        );
    }

    #[test]
    fn test_root_guard_revocation_failure_does_not_panic() {
        let api = MockEngine::new();
        api.fail_revoke_self.store(true, Ordering::SeqCst);

        let manager = TokenManager::new(&api);
        let guard = manager.regenerate_root(&material()).unwrap();
        drop(guard);

        assert_eq!(api.call_count("revoke-self"), 1);
    }

    #[test]
    fn test_regeneration_failure_is_fatal_and_mints_nothing() {
        let api = MockEngine::new();
        api.fail_regen.store(true, Ordering::SeqCst);

        let manager = TokenManager::new(&api);
        let err = manager.regenerate_root(&material()).unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Fatal);
        assert_eq!(api.call_count("revoke-self"), 0);
    }

    #[test]
    fn test_revoke_root_tokens_skips_self_and_non_root() {
        let api = MockEngine::new();
        api.add_stale_token("accessor-old-root", true);
        api.add_stale_token("accessor-service", false);

        let manager = TokenManager::new(&api);
        let revoked = manager.revoke_root_tokens(MOCK_TRANSIENT_ROOT);

        assert_eq!(revoked, 1);
        let calls = api.calls();
        assert!(calls.contains(&"revoke-accessor:accessor-old-root".to_string()));
        assert!(!calls.contains(&"revoke-accessor:accessor-service".to_string()));
        assert!(!calls.contains(&format!("revoke-accessor:{}", SELF_ACCESSOR)));
    }

    #[test]
    fn test_revoke_non_root_tokens_targets_only_non_root() {
        let api = MockEngine::new();
        api.add_stale_token("accessor-old-root", true);
        api.add_stale_token("accessor-service", false);

        let manager = TokenManager::new(&api);
        let revoked = manager.revoke_non_root_tokens(MOCK_TRANSIENT_ROOT);

        assert_eq!(revoked, 1);
        assert!(api
            .calls()
            .contains(&"revoke-accessor:accessor-service".to_string()));
    }

    #[test]
    fn test_stale_revocation_failure_is_swallowed() {
        let api = MockEngine::new();
        api.add_stale_token("accessor-a", false);
        api.add_stale_token("accessor-b", false);
        api.fail_revoke_accessors
            .lock()
            .unwrap()
            .insert("accessor-a".to_string());

        let manager = TokenManager::new(&api);
        let revoked = manager.revoke_non_root_tokens(MOCK_TRANSIENT_ROOT);

        // One failed, one succeeded, nothing aborted.
        assert_eq!(revoked, 1);
    }

    #[test]
    fn test_issuing_token_guard_revokes_on_drop() {
        let api = MockEngine::new();
        let manager = TokenManager::new(&api);

        {
            let (issued, _guard) = manager
                .create_token_issuing_token(MOCK_TRANSIENT_ROOT)
                .unwrap();
            assert!(!issued.token.is_empty());
        }

        assert_eq!(api.call_count("revoke-accessor:accessor-issuing"), 1);
        assert_eq!(api.call_count("install-policy"), 1);
    }

    #[test]
    fn test_released_issuing_guard_does_not_revoke() {
        let api = MockEngine::new();
        let manager = TokenManager::new(&api);

        let (_issued, guard) = manager
            .create_token_issuing_token(MOCK_TRANSIENT_ROOT)
            .unwrap();
        guard.release();

        assert_eq!(api.call_count("revoke-accessor:accessor-issuing"), 0);
    }

    #[test]
    fn test_admin_token_file_written_with_owner_only_permissions() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("provider").join("admin-token.json");

        let api = MockEngine::new();
        let manager = TokenManager::new(&api);
        let (issued, guard) = manager
            .create_token_issuing_token(MOCK_TRANSIENT_ROOT)
            .unwrap();
        guard.release();

        write_admin_token_file(&path, &issued).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["auth"]["client_token"], issued.token);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}
