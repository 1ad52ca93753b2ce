//! Administrative API client for the secret-store engine.
//!
//! [`EngineApi`] is the seam the rest of the bootstrap is written against;
//! [`HttpEngineClient`] is the production implementation speaking the
//! engine's HTTP API. Tests inject their own implementation, so nothing in
//! the crate talks to a live engine.

use base64::engine::general_purpose::STANDARD_NO_PAD as BASE64_NO_PAD;
use base64::Engine as _;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::core::config::StoreConfig;
use crate::core::constants;
use crate::core::material::InitMaterial;
use crate::error::{ApiError, ConfigError, Error, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Metadata returned by token lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub accessor: String,
    #[serde(default)]
    pub policies: Vec<String>,
}

impl TokenInfo {
    /// Whether the token carries the root policy.
    pub fn is_root(&self) -> bool {
        self.policies.iter().any(|p| p == "root")
    }
}

/// Parameters for minting a token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenCreateRequest {
    pub display_name: String,
    pub no_parent: bool,
    pub period: String,
    pub policies: Vec<String>,
}

/// A token minted by the engine, with the raw response body for callers
/// that persist it verbatim.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub accessor: String,
    pub raw: Value,
}

/// The engine operations the bootstrap depends on.
///
/// KV `path` arguments are relative to the KV mount (`secret/`).
pub trait EngineApi: Sync {
    /// Probe engine health. `None` means the probe could not be completed
    /// at the transport level.
    fn health(&self) -> Option<u16>;

    /// First-time generation of key shares and root token.
    fn initialize(&self, threshold: u32, shares: u32) -> std::result::Result<InitMaterial, ApiError>;

    /// Submit key shares until the engine reports itself unsealed.
    fn unseal(&self, material: &InitMaterial) -> std::result::Result<(), ApiError>;

    /// Mint a transient root token from the key shares.
    fn regenerate_root(&self, material: &InitMaterial) -> std::result::Result<String, ApiError>;

    fn revoke_self(&self, token: &str) -> std::result::Result<(), ApiError>;

    fn lookup_self(&self, token: &str) -> std::result::Result<TokenInfo, ApiError>;

    fn list_accessors(&self, token: &str) -> std::result::Result<Vec<String>, ApiError>;

    fn lookup_accessor(
        &self,
        token: &str,
        accessor: &str,
    ) -> std::result::Result<TokenInfo, ApiError>;

    fn revoke_accessor(&self, token: &str, accessor: &str) -> std::result::Result<(), ApiError>;

    fn install_policy(
        &self,
        token: &str,
        name: &str,
        document: &str,
    ) -> std::result::Result<(), ApiError>;

    fn create_token(
        &self,
        token: &str,
        request: &TokenCreateRequest,
    ) -> std::result::Result<IssuedToken, ApiError>;

    /// Whether a secrets engine of `engine_type` is mounted at `mount_key`.
    fn secrets_engine_installed(
        &self,
        token: &str,
        mount_key: &str,
        engine_type: &str,
    ) -> std::result::Result<bool, ApiError>;

    /// Mount a KV v1 secrets engine at `mount`.
    fn enable_kv_engine(&self, token: &str, mount: &str) -> std::result::Result<(), ApiError>;

    fn secret_exists(&self, token: &str, path: &str) -> std::result::Result<bool, ApiError>;

    fn write_secret(
        &self,
        token: &str,
        path: &str,
        value: &Value,
    ) -> std::result::Result<(), ApiError>;
}

/// HTTP implementation of [`EngineApi`].
pub struct HttpEngineClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct InitResponseBody {
    keys: Vec<String>,
    root_token: String,
}

#[derive(Deserialize)]
struct UnsealResponseBody {
    sealed: bool,
}

#[derive(Deserialize)]
struct RegenAttemptBody {
    otp: String,
    nonce: String,
}

#[derive(Deserialize)]
struct RegenUpdateBody {
    complete: bool,
    #[serde(default)]
    encoded_token: String,
}

#[derive(Deserialize)]
struct KeyListBody {
    data: KeyListData,
}

#[derive(Deserialize)]
struct KeyListData {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct LookupBody {
    data: TokenInfo,
}

#[derive(Deserialize)]
struct AuthBody {
    auth: AuthData,
}

#[derive(Deserialize)]
struct AuthData {
    client_token: String,
    accessor: String,
}

impl HttpEngineClient {
    /// Build a client for the configured endpoint.
    ///
    /// TLS verification follows the configuration: a CA bundle verifies the
    /// connection, optionally against a pinned server name. Without a CA
    /// bundle, or with `insecure_skip_verify`, verification is bypassed.
    pub fn new(store: &StoreConfig, insecure_skip_verify: bool) -> Result<Self> {
        let mut builder = Client::builder().timeout(constants::REQUEST_TIMEOUT);
        let mut base_url = store.base_url();

        match &store.ca_file {
            Some(ca_file) if !insecure_skip_verify => {
                debug!(ca = %ca_file.display(), "using certificate verification");
                let pem = std::fs::read(ca_file)?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    Error::Config(ConfigError::InvalidValue {
                        field: "store.ca_file",
                        reason: e.to_string(),
                    })
                })?;
                builder = builder.add_root_certificate(cert).tls_built_in_root_certs(false);

                // Pin the certificate's server name while still dialing the
                // configured host.
                if let Some(server_name) = &store.server_name {
                    let addr = resolve_host(&store.host, store.port)?;
                    builder = builder.resolve(server_name, addr);
                    base_url = format!("{}://{}:{}", store.protocol, server_name, store.port);
                }
            }
            _ => {
                debug!("bypassing certificate verification");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        let http = builder.build().map_err(|e| {
            Error::Config(ConfigError::InvalidValue {
                field: "store",
                reason: format!("could not build HTTP client: {}", e),
            })
        })?;

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn kv_url(&self, path: &str) -> String {
        format!("{}/v1/{}/{}", self.base_url, constants::KV_MOUNT, path)
    }

    fn send(op: &'static str, request: RequestBuilder) -> std::result::Result<Response, ApiError> {
        trace!(op, "engine request");
        request
            .send()
            .map_err(|source| ApiError::Transport { op, source })
    }

    fn expect_success(
        op: &'static str,
        response: Response,
    ) -> std::result::Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::UnexpectedStatus {
                op,
                status: status.as_u16(),
            })
        }
    }

    fn json_body<T: serde::de::DeserializeOwned>(
        op: &'static str,
        response: Response,
    ) -> std::result::Result<T, ApiError> {
        response
            .json()
            .map_err(|_| ApiError::MalformedResponse { op, field: "body" })
    }
}

impl EngineApi for HttpEngineClient {
    fn health(&self) -> Option<u16> {
        let response = self
            .http
            .get(self.url("/v1/sys/health"))
            .send()
            .ok()?;
        Some(response.status().as_u16())
    }

    fn initialize(
        &self,
        threshold: u32,
        shares: u32,
    ) -> std::result::Result<InitMaterial, ApiError> {
        const OP: &str = "init";

        let request = self.http.put(self.url("/v1/sys/init")).json(&serde_json::json!({
            "secret_shares": shares,
            "secret_threshold": threshold,
        }));
        let response = Self::expect_success(OP, Self::send(OP, request)?)?;
        let body: InitResponseBody = Self::json_body(OP, response)?;

        Ok(InitMaterial {
            root_token: Some(body.root_token),
            keys: body.keys,
            threshold,
            shares,
        })
    }

    fn unseal(&self, material: &InitMaterial) -> std::result::Result<(), ApiError> {
        const OP: &str = "unseal";

        let mut submitted = 0;
        for share in &material.keys {
            let request = self
                .http
                .put(self.url("/v1/sys/unseal"))
                .json(&serde_json::json!({ "key": share }));
            let response = Self::expect_success(OP, Self::send(OP, request)?)?;
            let body: UnsealResponseBody = Self::json_body(OP, response)?;

            submitted += 1;
            debug!(submitted, sealed = body.sealed, "unseal progress");
            if !body.sealed {
                return Ok(());
            }
        }

        Err(ApiError::StillSealed { submitted })
    }

    fn regenerate_root(&self, material: &InitMaterial) -> std::result::Result<String, ApiError> {
        const OP: &str = "generate-root";

        // Cancel any half-finished attempt from a crashed run; a stale nonce
        // would otherwise poison the fresh attempt.
        let cancel = self
            .http
            .request(Method::DELETE, self.url("/v1/sys/generate-root/attempt"));
        let _ = Self::send(OP, cancel);

        let start = self
            .http
            .put(self.url("/v1/sys/generate-root/attempt"))
            .json(&serde_json::json!({}));
        let response = Self::expect_success(OP, Self::send(OP, start)?)?;
        let attempt: RegenAttemptBody = Self::json_body(OP, response)?;

        let mut submitted = 0;
        for share in &material.keys {
            let update = self
                .http
                .put(self.url("/v1/sys/generate-root/update"))
                .json(&serde_json::json!({
                    "key": share,
                    "nonce": attempt.nonce,
                }));
            let response = Self::expect_success(OP, Self::send(OP, update)?)?;
            let body: RegenUpdateBody = Self::json_body(OP, response)?;

            submitted += 1;
            if body.complete {
                return decode_root_token(&body.encoded_token, &attempt.otp);
            }
        }

        Err(ApiError::RegenIncomplete { submitted })
    }

    fn revoke_self(&self, token: &str) -> std::result::Result<(), ApiError> {
        const OP: &str = "revoke-self";

        let request = self
            .http
            .post(self.url("/v1/auth/token/revoke-self"))
            .header(TOKEN_HEADER, token);
        Self::expect_success(OP, Self::send(OP, request)?)?;
        Ok(())
    }

    fn lookup_self(&self, token: &str) -> std::result::Result<TokenInfo, ApiError> {
        const OP: &str = "lookup-self";

        let request = self
            .http
            .get(self.url("/v1/auth/token/lookup-self"))
            .header(TOKEN_HEADER, token);
        let response = Self::expect_success(OP, Self::send(OP, request)?)?;
        let body: LookupBody = Self::json_body(OP, response)?;
        Ok(body.data)
    }

    fn list_accessors(&self, token: &str) -> std::result::Result<Vec<String>, ApiError> {
        const OP: &str = "list-accessors";

        let request = self
            .http
            .request(
                Method::from_bytes(b"LIST").expect("LIST is a valid method"),
                self.url("/v1/auth/token/accessors"),
            )
            .header(TOKEN_HEADER, token);
        let response = Self::expect_success(OP, Self::send(OP, request)?)?;
        let body: KeyListBody = Self::json_body(OP, response)?;
        Ok(body.data.keys)
    }

    fn lookup_accessor(
        &self,
        token: &str,
        accessor: &str,
    ) -> std::result::Result<TokenInfo, ApiError> {
        const OP: &str = "lookup-accessor";

        let request = self
            .http
            .post(self.url("/v1/auth/token/lookup-accessor"))
            .header(TOKEN_HEADER, token)
            .json(&serde_json::json!({ "accessor": accessor }));
        let response = Self::expect_success(OP, Self::send(OP, request)?)?;
        let body: LookupBody = Self::json_body(OP, response)?;
        Ok(body.data)
    }

    fn revoke_accessor(&self, token: &str, accessor: &str) -> std::result::Result<(), ApiError> {
        const OP: &str = "revoke-accessor";

        let request = self
            .http
            .post(self.url("/v1/auth/token/revoke-accessor"))
            .header(TOKEN_HEADER, token)
            .json(&serde_json::json!({ "accessor": accessor }));
        Self::expect_success(OP, Self::send(OP, request)?)?;
        Ok(())
    }

    fn install_policy(
        &self,
        token: &str,
        name: &str,
        document: &str,
    ) -> std::result::Result<(), ApiError> {
        const OP: &str = "install-policy";

        let request = self
            .http
            .put(self.url(&format!("/v1/sys/policies/acl/{}", name)))
            .header(TOKEN_HEADER, token)
            .json(&serde_json::json!({ "policy": document }));
        Self::expect_success(OP, Self::send(OP, request)?)?;
        Ok(())
    }

    fn create_token(
        &self,
        token: &str,
        request: &TokenCreateRequest,
    ) -> std::result::Result<IssuedToken, ApiError> {
        const OP: &str = "create-token";

        let http_request = self
            .http
            .post(self.url("/v1/auth/token/create"))
            .header(TOKEN_HEADER, token)
            .json(request);
        let response = Self::expect_success(OP, Self::send(OP, http_request)?)?;
        let raw: Value = Self::json_body(OP, response)?;

        let body: AuthBody = serde_json::from_value(raw.clone())
            .map_err(|_| ApiError::MalformedResponse { op: OP, field: "auth" })?;

        Ok(IssuedToken {
            token: body.auth.client_token,
            accessor: body.auth.accessor,
            raw,
        })
    }

    fn secrets_engine_installed(
        &self,
        token: &str,
        mount_key: &str,
        engine_type: &str,
    ) -> std::result::Result<bool, ApiError> {
        const OP: &str = "list-mounts";

        let request = self
            .http
            .get(self.url("/v1/sys/mounts"))
            .header(TOKEN_HEADER, token);
        let response = Self::expect_success(OP, Self::send(OP, request)?)?;
        let body: Value = Self::json_body(OP, response)?;

        // Older engines answer with the mount table at the top level, newer
        // ones nest it under "data".
        let mount = body
            .get(mount_key)
            .or_else(|| body.get("data").and_then(|d| d.get(mount_key)));

        Ok(mount
            .and_then(|m| m.get("type"))
            .and_then(Value::as_str)
            .is_some_and(|t| t == engine_type))
    }

    fn enable_kv_engine(&self, token: &str, mount: &str) -> std::result::Result<(), ApiError> {
        const OP: &str = "enable-kv-engine";

        let request = self
            .http
            .post(self.url(&format!("/v1/sys/mounts/{}", mount)))
            .header(TOKEN_HEADER, token)
            .json(&serde_json::json!({
                "type": constants::KV_ENGINE_TYPE,
                "options": { "version": "1" },
            }));
        Self::expect_success(OP, Self::send(OP, request)?)?;
        Ok(())
    }

    fn secret_exists(&self, token: &str, path: &str) -> std::result::Result<bool, ApiError> {
        const OP: &str = "read-secret";

        let request = self.http.get(self.kv_url(path)).header(TOKEN_HEADER, token);
        let response = Self::send(OP, request)?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(ApiError::UnexpectedStatus { op: OP, status }),
        }
    }

    fn write_secret(
        &self,
        token: &str,
        path: &str,
        value: &Value,
    ) -> std::result::Result<(), ApiError> {
        const OP: &str = "write-secret";

        let request = self
            .http
            .post(self.kv_url(path))
            .header(TOKEN_HEADER, token)
            .json(value);
        Self::expect_success(OP, Self::send(OP, request)?)?;
        Ok(())
    }
}

/// Recover the plaintext root token from a completed regeneration attempt.
///
/// The engine returns the token XOR-ed with the attempt's OTP, base64
/// encoded (padding optional across engine versions).
fn decode_root_token(encoded: &str, otp: &str) -> std::result::Result<String, ApiError> {
    const OP: &str = "generate-root";

    let mut bytes = BASE64_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|_| ApiError::MalformedResponse {
            op: OP,
            field: "encoded_token",
        })?;

    let otp_bytes = otp.as_bytes();
    if otp_bytes.len() != bytes.len() {
        return Err(ApiError::MalformedResponse {
            op: OP,
            field: "encoded_token",
        });
    }
    for (byte, key) in bytes.iter_mut().zip(otp_bytes) {
        *byte ^= key;
    }

    String::from_utf8(bytes).map_err(|_| ApiError::MalformedResponse {
        op: OP,
        field: "encoded_token",
    })
}

fn resolve_host(host: &str, port: u16) -> Result<std::net::SocketAddr> {
    use std::net::ToSocketAddrs;

    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| {
            Error::Config(ConfigError::InvalidValue {
                field: "store.host",
                reason: format!("could not resolve {}", host),
            })
        })
}
