//! Turnkey - a bootstrap sidecar for Vault-compatible secret stores.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── cli               # Command-line surface and top-level run
//! └── core/             # Core library components
//!     ├── config        # turnkey.toml management
//!     ├── client        # Engine administrative API (EngineApi + HTTP impl)
//!     ├── state         # Engine state machine and init/unseal loop
//!     ├── health        # Post-unseal readiness gate
//!     ├── material      # Init-material model and persistence
//!     ├── kdf           # HKDF-SHA256 key derivation + salt management
//!     ├── master_key    # At-rest encryption of the init material
//!     ├── tokens        # Root/issuing token lifecycle with scoped revocation
//!     ├── token_provider# Delegated token-provider launch
//!     ├── password      # Named password-generation strategy
//!     ├── credentials   # Idempotent database credential uploads
//!     ├── certs         # Idempotent certificate pair upload
//!     └── bootstrap     # The orchestrated run
//! ```
//!
//! # Features
//!
//! - Explicit engine state machine driven through a mockable API seam
//! - AES-256-GCM master-key encryption of persisted key shares
//! - Guaranteed cleanup of IKM and the transient root token on every exit
//!   path
//! - Idempotent credential and certificate provisioning

pub mod cli;
pub mod core;
pub mod error;
