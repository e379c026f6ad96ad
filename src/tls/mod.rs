// tls/mod.rs - TLS Certificate Material

//! Certificate material for the Minio endpoint.
//!
//! Material comes from, in order of precedence:
//!
//! 1. The `ssl_cert` / `ssl_key` settings (base64 encoded PEM)
//! 2. The `certificates` relation, answered by a certificate authority
//! 3. Nowhere: the endpoint is served over plain HTTP
//!
//! When the relation exists but has not answered yet the state is
//! [`TlsState::Pending`] and evaluations wait for it.

mod pem;

pub use pem::{break_chain, ca_chain};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info};

use crate::relation::{DirectoryError, PeerDirectory};
use crate::settings::Settings;

/// Relation the certificate authority is reached over
pub const CERTIFICATES_RELATION: &str = "certificates";

/// Relation data keys of the certificates protocol
pub mod keys {
    pub const CN: &str = "cn";
    pub const SANS: &str = "sans";
    pub const SERVER_CERTS: &str = "server_certs";
    pub const CHAIN: &str = "chain";
}

/// TLS errors
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Invalid base64 in {option}: {reason}")]
    Decode { option: &'static str, reason: String },

    #[error("Malformed certificates response: {0}")]
    MalformedResponse(String),

    #[error("Relation error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Certificate and key served by Minio
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMaterial {
    /// Leaf certificate followed by its chain
    pub cert: String,
    pub key: String,
}

impl CertificateMaterial {
    pub fn ca_chain(&self) -> String {
        ca_chain(&self.cert)
    }

    pub fn has_ca(&self) -> bool {
        !self.ca_chain().is_empty()
    }
}

/// Availability of certificate material
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsState {
    /// No option and no relation: serve plain HTTP
    Disabled,

    /// A certificate authority is related but has not answered yet
    Pending(String),

    Ready(CertificateMaterial),
}

impl TlsState {
    pub fn material(&self) -> Option<&CertificateMaterial> {
        match self {
            TlsState::Ready(material) => Some(material),
            _ => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.material().is_some() {
            "https"
        } else {
            "http"
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TlsState::Pending(_))
    }
}

/// Server certificate request sent to the certificate authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Common name, always the binding address so answers can be matched
    pub cn: String,
    pub sans: BTreeSet<String>,
}

impl CertificateRequest {
    /// Request covering every name the unit is reached under
    pub fn for_unit(binding_addr: &str, hostname: &str, settings: &Settings) -> Self {
        let sans = [
            binding_addr,
            hostname,
            settings.service_url.as_str(),
            settings.service_vip.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

        Self {
            cn: binding_addr.to_string(),
            sans,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerCert {
    cert: String,
    key: String,
}

/// Resolves certificate material from settings and the certificates relation
#[derive(Debug, Clone)]
pub struct TlsResolver {
    relation: String,
}

impl Default for TlsResolver {
    fn default() -> Self {
        Self::new(CERTIFICATES_RELATION)
    }
}

impl TlsResolver {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
        }
    }

    pub fn is_related(&self, dir: &dyn PeerDirectory) -> bool {
        dir.has_relation(&self.relation)
    }

    /// Publish a certificate request if the relation is present
    pub fn request_certificate(
        &self,
        dir: &mut dyn PeerDirectory,
        request: &CertificateRequest,
    ) -> Result<bool, TlsError> {
        if !self.is_related(dir) {
            return Ok(false);
        }
        let sans = serde_json::to_string(&request.sans)
            .map_err(|e| TlsError::MalformedResponse(e.to_string()))?;
        dir.set_unit_data(&self.relation, keys::CN, &request.cn)?;
        dir.set_unit_data(&self.relation, keys::SANS, &sans)?;
        info!(cn = %request.cn, sans = request.sans.len(), "Requested server certificate");
        Ok(true)
    }

    /// Current certificate material for the given binding address
    pub fn resolve(
        &self,
        settings: &Settings,
        dir: &dyn PeerDirectory,
        binding_addr: &str,
    ) -> Result<TlsState, TlsError> {
        if !settings.ssl_cert.is_empty() && !settings.ssl_key.is_empty() {
            debug!("Using certificate material from settings");
            return Ok(TlsState::Ready(CertificateMaterial {
                cert: decode_option("ssl_cert", &settings.ssl_cert)?,
                key: decode_option("ssl_key", &settings.ssl_key)?,
            }));
        }

        if !self.is_related(dir) {
            return Ok(TlsState::Disabled);
        }

        for unit in dir.remote_units(&self.relation) {
            let data = dir.unit_data(&self.relation, &unit);
            let Some(raw) = data.get(keys::SERVER_CERTS) else {
                continue;
            };
            let certs: BTreeMap<String, ServerCert> = serde_json::from_str(raw)
                .map_err(|e| TlsError::MalformedResponse(e.to_string()))?;
            if let Some(server) = certs.get(binding_addr) {
                let chain = data.get(keys::CHAIN).map(String::as_str).unwrap_or("");
                debug!(authority = %unit, "Using certificate material from relation");
                return Ok(TlsState::Ready(CertificateMaterial {
                    cert: format!("{}{}", server.cert, chain),
                    key: server.key.clone(),
                }));
            }
        }

        Ok(TlsState::Pending(format!(
            "no certificate issued for {} yet",
            binding_addr
        )))
    }
}

fn decode_option(option: &'static str, value: &str) -> Result<String, TlsError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| TlsError::Decode {
            option,
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| TlsError::Decode {
        option,
        reason: e.to_string(),
    })
}
