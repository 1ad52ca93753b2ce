//! Shared test double for the engine API.
//!
//! A scriptable in-memory [`EngineApi`] implementation: health responses are
//! queued, failures are injected per operation, and every call is recorded
//! so tests can assert on ordering and idempotence.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use crate::core::client::{EngineApi, IssuedToken, TokenCreateRequest, TokenInfo};
use crate::core::material::InitMaterial;
use crate::error::ApiError;

pub(crate) const MOCK_ROOT_TOKEN: &str = "hvs.mock-initial-root";
pub(crate) const MOCK_TRANSIENT_ROOT: &str = "hvs.mock-transient-root";
pub(crate) const MOCK_ISSUING_TOKEN: &str = "hvs.mock-issuing";
pub(crate) const SELF_ACCESSOR: &str = "accessor-self";

#[derive(Default)]
pub(crate) struct MockEngine {
    /// Health responses consumed one per probe; `default_health` answers
    /// once the queue is drained.
    pub health_queue: Mutex<VecDeque<Option<u16>>>,
    pub default_health: Mutex<Option<u16>>,

    /// Remaining number of times each operation fails before succeeding.
    pub fail_init: AtomicUsize,
    pub fail_unseal: AtomicUsize,
    pub fail_regen: AtomicBool,
    pub fail_revoke_self: AtomicBool,
    /// Accessors whose revocation fails.
    pub fail_revoke_accessors: Mutex<BTreeSet<String>>,
    /// KV paths whose writes fail.
    pub fail_writes: Mutex<BTreeSet<String>>,

    /// Stale tokens visible through the accessor listing.
    pub accessors: Mutex<BTreeMap<String, TokenInfo>>,

    pub kv_installed: AtomicBool,
    pub kv: Mutex<BTreeMap<String, Value>>,

    /// Every API call, in order, as `op` or `op:detail`.
    pub calls: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_health(&self, code: Option<u16>) {
        self.health_queue.lock().unwrap().push_back(code);
    }

    pub fn set_default_health(&self, code: Option<u16>) {
        *self.default_health.lock().unwrap() = code;
    }

    pub fn add_stale_token(&self, accessor: &str, root: bool) {
        let policies = if root {
            vec!["root".to_string()]
        } else {
            vec!["default".to_string()]
        };
        self.accessors.lock().unwrap().insert(
            accessor.to_string(),
            TokenInfo {
                accessor: accessor.to_string(),
                policies,
            },
        );
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EngineApi for MockEngine {
    fn health(&self) -> Option<u16> {
        self.record("health");
        if let Some(code) = self.health_queue.lock().unwrap().pop_front() {
            return code;
        }
        *self.default_health.lock().unwrap()
    }

    fn initialize(&self, threshold: u32, shares: u32) -> Result<InitMaterial, ApiError> {
        self.record("init");
        if Self::take_failure(&self.fail_init) {
            return Err(ApiError::UnexpectedStatus {
                op: "init",
                status: 500,
            });
        }
        Ok(InitMaterial {
            root_token: Some(MOCK_ROOT_TOKEN.to_string()),
            keys: (0..shares).map(|i| format!("share-{:02}", i)).collect(),
            threshold,
            shares,
        })
    }

    fn unseal(&self, material: &InitMaterial) -> Result<(), ApiError> {
        self.record(format!("unseal:{}", material.keys.join(",")));
        if Self::take_failure(&self.fail_unseal) {
            return Err(ApiError::StillSealed {
                submitted: material.keys.len(),
            });
        }
        Ok(())
    }

    fn regenerate_root(&self, _material: &InitMaterial) -> Result<String, ApiError> {
        self.record("regenerate-root");
        if self.fail_regen.load(Ordering::SeqCst) {
            return Err(ApiError::RegenIncomplete { submitted: 0 });
        }
        Ok(MOCK_TRANSIENT_ROOT.to_string())
    }

    fn revoke_self(&self, token: &str) -> Result<(), ApiError> {
        self.record(format!("revoke-self:{}", token));
        if self.fail_revoke_self.load(Ordering::SeqCst) {
            return Err(ApiError::UnexpectedStatus {
                op: "revoke-self",
                status: 500,
            });
        }
        Ok(())
    }

    fn lookup_self(&self, _token: &str) -> Result<TokenInfo, ApiError> {
        self.record("lookup-self");
        Ok(TokenInfo {
            accessor: SELF_ACCESSOR.to_string(),
            policies: vec!["root".to_string()],
        })
    }

    fn list_accessors(&self, _token: &str) -> Result<Vec<String>, ApiError> {
        self.record("list-accessors");
        let mut keys: Vec<String> = self.accessors.lock().unwrap().keys().cloned().collect();
        keys.push(SELF_ACCESSOR.to_string());
        Ok(keys)
    }

    fn lookup_accessor(&self, _token: &str, accessor: &str) -> Result<TokenInfo, ApiError> {
        self.record(format!("lookup-accessor:{}", accessor));
        if accessor == SELF_ACCESSOR {
            return Ok(TokenInfo {
                accessor: SELF_ACCESSOR.to_string(),
                policies: vec!["root".to_string()],
            });
        }
        self.accessors
            .lock()
            .unwrap()
            .get(accessor)
            .cloned()
            .ok_or(ApiError::UnexpectedStatus {
                op: "lookup-accessor",
                status: 404,
            })
    }

    fn revoke_accessor(&self, _token: &str, accessor: &str) -> Result<(), ApiError> {
        self.record(format!("revoke-accessor:{}", accessor));
        if self.fail_revoke_accessors.lock().unwrap().contains(accessor) {
            return Err(ApiError::UnexpectedStatus {
                op: "revoke-accessor",
                status: 403,
            });
        }
        self.accessors.lock().unwrap().remove(accessor);
        Ok(())
    }

    fn install_policy(&self, _token: &str, name: &str, _document: &str) -> Result<(), ApiError> {
        self.record(format!("install-policy:{}", name));
        Ok(())
    }

    fn create_token(
        &self,
        _token: &str,
        request: &TokenCreateRequest,
    ) -> Result<IssuedToken, ApiError> {
        self.record(format!("create-token:{}", request.display_name));
        Ok(IssuedToken {
            token: MOCK_ISSUING_TOKEN.to_string(),
            accessor: "accessor-issuing".to_string(),
            raw: serde_json::json!({
                "auth": {
                    "client_token": MOCK_ISSUING_TOKEN,
                    "accessor": "accessor-issuing",
                }
            }),
        })
    }

    fn secrets_engine_installed(
        &self,
        _token: &str,
        _mount_key: &str,
        _engine_type: &str,
    ) -> Result<bool, ApiError> {
        self.record("list-mounts");
        Ok(self.kv_installed.load(Ordering::SeqCst))
    }

    fn enable_kv_engine(&self, _token: &str, mount: &str) -> Result<(), ApiError> {
        self.record(format!("enable-kv:{}", mount));
        self.kv_installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn secret_exists(&self, _token: &str, path: &str) -> Result<bool, ApiError> {
        self.record(format!("exists:{}", path));
        Ok(self.kv.lock().unwrap().contains_key(path))
    }

    fn write_secret(&self, _token: &str, path: &str, value: &Value) -> Result<(), ApiError> {
        self.record(format!("write:{}", path));
        if self.fail_writes.lock().unwrap().contains(path) {
            return Err(ApiError::UnexpectedStatus {
                op: "write-secret",
                status: 500,
            });
        }
        self.kv
            .lock()
            .unwrap()
            .insert(path.to_string(), value.clone());
        Ok(())
    }
}
