//! Error types and failure classification.
//!
//! Every failure carries enough context to be logged once, at the point where
//! the bootstrap flow decides what to do with it. The decision itself is
//! driven by [`Kind`], so retry/abort policy is declared in one place rather
//! than inferred from call sites.

use thiserror::Error;

/// How the bootstrap flow must react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Retry on a fixed interval, without bound.
    Transient,
    /// Stop cleanly and report failure to the caller without aborting the
    /// process. This instance has nothing further to do.
    Terminal,
    /// Abort the run.
    Fatal,
    /// Log a warning and carry on.
    BestEffort,
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("missing required config field: {field}")]
    MissingField { field: &'static str },
}

/// Failures talking to the secret-store engine's administrative API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The engine is unsealed but not the active node. Another instance owns
    /// unsealing for this deployment; this one must stand down.
    #[error("secret store is unsealed but in standby mode")]
    Standby,

    #[error("{op} request failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{op} returned unexpected status {status}")]
    UnexpectedStatus { op: &'static str, status: u16 },

    #[error("{op} response missing or malformed field: {field}")]
    MalformedResponse { op: &'static str, field: &'static str },

    #[error("engine still sealed after submitting {submitted} key shares")]
    StillSealed { submitted: usize },

    #[error("root-token regeneration incomplete after {submitted} key shares")]
    RegenIncomplete { submitted: usize },
}

/// Master-key encryption failures: IKM intake, key derivation, and the
/// encrypt/decrypt transforms on persisted init material.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("could not read IKM from {path}: {source}")]
    IkmRead {
        path: String,
        source: std::io::Error,
    },

    #[error("IKM is not valid hex: {0}")]
    IkmDecode(#[from] hex::FromHexError),

    #[error("IKM source {0} yielded no key material")]
    IkmEmpty(String),

    #[error("IKM has been wiped; encryption context is no longer available")]
    IkmWiped,

    #[error("salt file {path}: {reason}")]
    Salt { path: String, reason: String },

    #[error("key derivation failed: {0}")]
    Derive(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("ciphertext is not valid base64: {0}")]
    CiphertextDecode(#[from] base64::DecodeError),
}

/// Failures persisting or loading the initialization material file.
#[derive(Error, Debug)]
pub enum MaterialError {
    #[error("could not read init material {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("could not write init material {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("init material {path} is malformed: {source}")]
    Malformed {
        path: String,
        source: serde_json::Error,
    },
}

/// Token lifecycle failures.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("root token regeneration failed: {0}")]
    Regenerate(#[source] ApiError),

    #[error("could not revoke stale token accessor {accessor}: {source}")]
    StaleRevocation {
        accessor: String,
        #[source]
        source: ApiError,
    },

    #[error("could not create token-issuing token: {0}")]
    Issuing(#[source] ApiError),

    #[error("could not write admin token file {path}: {source}")]
    AdminTokenFile {
        path: String,
        source: std::io::Error,
    },
}

/// Credential, certificate and secrets-engine provisioning failures.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("provider executable {program} could not be resolved: {source}")]
    ProviderNotFound {
        program: String,
        source: which::Error,
    },

    #[error("password provider {program} failed: {reason}")]
    PasswordGeneration { program: String, reason: String },

    #[error("token provider {program} failed: {reason}")]
    TokenProvider { program: String, reason: String },

    #[error("existence check failed for {path}: {source}")]
    Probe {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("upload failed for {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("could not read certificate pair: {0}")]
    CertificateRead(String),

    #[error("KV secrets engine enablement failed: {0}")]
    KvEngine(#[source] ApiError),
}

/// Top-level error for the crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Material(#[from] MaterialError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("shutdown requested")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error for dispatch.
    ///
    /// The mapping is total: engine-state and init/unseal failures are
    /// retried, standby and shutdown stop the run cleanly, stale-token
    /// cleanup is advisory, and everything else aborts.
    pub fn kind(&self) -> Kind {
        match self {
            Error::Api(ApiError::Standby) => Kind::Terminal,
            Error::Cancelled => Kind::Terminal,
            Error::Api(_) => Kind::Transient,
            Error::Token(TokenError::StaleRevocation { .. }) => Kind::BestEffort,
            Error::Config(_)
            | Error::Crypto(_)
            | Error::Material(_)
            | Error::Token(_)
            | Error::Provision(_)
            | Error::Io(_) => Kind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standby_is_terminal() {
        let err = Error::from(ApiError::Standby);
        assert_eq!(err.kind(), Kind::Terminal);
    }

    #[test]
    fn test_cancellation_is_terminal() {
        assert_eq!(Error::Cancelled.kind(), Kind::Terminal);
    }

    #[test]
    fn test_unseal_progress_failures_are_transient() {
        let err = Error::from(ApiError::StillSealed { submitted: 3 });
        assert_eq!(err.kind(), Kind::Transient);

        let err = Error::from(ApiError::UnexpectedStatus {
            op: "init",
            status: 500,
        });
        assert_eq!(err.kind(), Kind::Transient);
    }

    #[test]
    fn test_stale_revocation_is_best_effort() {
        let err = Error::from(TokenError::StaleRevocation {
            accessor: "abc".to_string(),
            source: ApiError::UnexpectedStatus {
                op: "revoke-accessor",
                status: 403,
            },
        });
        assert_eq!(err.kind(), Kind::BestEffort);
    }

    #[test]
    fn test_crypto_and_material_failures_are_fatal() {
        let err = Error::from(CryptoError::IkmEmpty("/run/ikm".to_string()));
        assert_eq!(err.kind(), Kind::Fatal);

        let err = Error::from(MaterialError::Read {
            path: "/run/turnkey/init-material.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        });
        assert_eq!(err.kind(), Kind::Fatal);
    }

    #[test]
    fn test_root_regeneration_is_fatal() {
        let err = Error::from(TokenError::Regenerate(ApiError::RegenIncomplete {
            submitted: 5,
        }));
        assert_eq!(err.kind(), Kind::Fatal);
    }
}
