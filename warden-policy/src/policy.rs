//! Grant-file policy implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use warden_engine::permission::{
    ALL_PERMISSION_KIND, PROPERTY_PERMISSION_KIND, RUNTIME_PERMISSION_KIND,
    SECURITY_PERMISSION_KIND,
};
use warden_engine::{
    AllPermission, BasicPermission, Certificate, CodeSource, EngineError, Grant, Permission,
    PermissionCollection, Permissions, Policy, Principal, PropertyPermission, ProtectionDomain,
    UnresolvedPermission,
};

use crate::config::{
    CertificateConfig, GrantConfig, PermissionConfig, PolicyConfig, PolicyConfigError,
    PrincipalConfig,
};
use crate::matching::all_principals_match;

/// Policy backed by TOML grant entries.
///
/// Each entry grants permissions to code whose source is implied by the
/// entry's code base and signers, optionally only when running as matching
/// principals. Built-in kinds are constructed when the policy is loaded;
/// any other kind is kept as an unresolved grant until a permission of that
/// kind is checked.
pub struct GrantPolicy {
    /// File the policy was loaded from, re-read on refresh.
    source: Option<PathBuf>,
    entries: RwLock<Vec<GrantEntry>>,
}

#[derive(Debug)]
struct GrantEntry {
    code_source: CodeSource,
    principals: Vec<PrincipalConfig>,
    grants: Vec<Grant>,
}

impl GrantEntry {
    fn applies_to(&self, code_source: &CodeSource) -> bool {
        self.code_source.implies(code_source)
    }
}

impl GrantPolicy {
    /// Create a grant policy from a parsed configuration.
    pub fn from_config(config: PolicyConfig) -> Result<Self, PolicyConfigError> {
        Ok(Self {
            source: None,
            entries: RwLock::new(build_entries(config)?),
        })
    }

    /// Create a grant policy from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, PolicyConfigError> {
        let config = PolicyConfig::parse(content)?;
        Self::from_config(config)
    }

    /// Create a grant policy from a TOML file. [`Policy::refresh`] re-reads
    /// the file.
    pub fn from_file(path: &Path) -> Result<Self, PolicyConfigError> {
        let config = PolicyConfig::from_file(path)?;
        let entries = build_entries(config)?;
        info!(path = %path.display(), entries = entries.len(), "loaded grant policy");
        Ok(Self {
            source: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
        })
    }

    /// Create an empty policy (useful for testing).
    pub fn empty() -> Self {
        Self {
            source: None,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Number of grant entries.
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    fn collect(&self, code_source: &CodeSource, principals: Option<&[Principal]>) -> Permissions {
        let permissions = Permissions::new();
        let entries = self.entries.read();
        for entry in entries.iter() {
            if !entry.applies_to(code_source) {
                continue;
            }
            let principals_ok = match principals {
                Some(principals) => all_principals_match(&entry.principals, principals),
                None => entry.principals.is_empty(),
            };
            if !principals_ok {
                continue;
            }
            for grant in &entry.grants {
                if let Err(e) = permissions.add_grant(grant.clone()) {
                    warn!(error = %e, "skipping grant");
                }
            }
        }
        permissions
    }
}

impl Policy for GrantPolicy {
    fn permissions(&self, code_source: &CodeSource) -> Permissions {
        self.collect(code_source, None)
    }

    fn permissions_for_domain(&self, domain: &ProtectionDomain) -> Permissions {
        let any = CodeSource::any();
        let code_source = domain.code_source().unwrap_or(&any);
        let granted = self.collect(code_source, Some(domain.principals()));

        if let Some(static_permissions) = domain.permissions() {
            for permission in static_permissions.elements() {
                if let Err(e) = granted.add(permission) {
                    debug!(error = %e, "skipping static domain permission");
                }
            }
        }
        granted
    }

    fn refresh(&self) -> Result<(), EngineError> {
        let Some(path) = &self.source else {
            return Ok(());
        };

        let entries = PolicyConfig::from_file(path)
            .and_then(build_entries)
            .map_err(|e| {
                warn!(path = %path.display(), error = %e, "policy refresh failed");
                EngineError::Policy(e.to_string())
            })?;

        info!(path = %path.display(), entries = entries.len(), "reloaded grant policy");
        *self.entries.write() = entries;
        Ok(())
    }
}

fn build_entries(config: PolicyConfig) -> Result<Vec<GrantEntry>, PolicyConfigError> {
    let certificates: HashMap<String, Certificate> = config
        .certificates
        .iter()
        .map(|(alias, cert)| (alias.clone(), certificate(cert)))
        .collect();

    let mut entries = Vec::with_capacity(config.grants.len());
    for grant in config.grants {
        match build_entry(grant, &certificates)? {
            Some(entry) => entries.push(entry),
            None => continue,
        }
    }
    Ok(entries)
}

fn build_entry(
    grant: GrantConfig,
    certificates: &HashMap<String, Certificate>,
) -> Result<Option<GrantEntry>, PolicyConfigError> {
    let location = grant
        .code_base
        .as_deref()
        .map(|code_base| {
            Url::parse(code_base).map_err(|e| PolicyConfigError::InvalidLocation {
                code_base: code_base.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()?;

    // An entry signed by an unknown alias can never match any code.
    let Some(signers) = lookup_certs(&grant.signed_by, certificates) else {
        warn!(signed_by = ?grant.signed_by, "skipping grant with unknown signer alias");
        return Ok(None);
    };

    let code_source = CodeSource::new(location, Some(signers));
    let mut grants = Vec::with_capacity(grant.permissions.len());
    for permission in &grant.permissions {
        let Some(certs) = lookup_certs(&permission.signed_by, certificates) else {
            warn!(
                kind = %permission.kind,
                name = %permission.name,
                "skipping permission with unknown signer alias"
            );
            continue;
        };
        grants.push(build_grant(permission, certs)?);
    }

    Ok(Some(GrantEntry {
        code_source,
        principals: grant.principals,
        grants,
    }))
}

fn lookup_certs(
    aliases: &[String],
    certificates: &HashMap<String, Certificate>,
) -> Option<Vec<Certificate>> {
    aliases
        .iter()
        .map(|alias| certificates.get(alias).cloned())
        .collect()
}

fn certificate(config: &CertificateConfig) -> Certificate {
    let encoded = config
        .encoded
        .clone()
        .unwrap_or_else(|| config.subject.clone());
    Certificate::new(config.subject.clone(), encoded.into_bytes())
}

fn build_grant(
    permission: &PermissionConfig,
    certs: Vec<Certificate>,
) -> Result<Grant, PolicyConfigError> {
    let actions = permission.actions.as_deref().unwrap_or("");
    if !certs.is_empty() {
        return Ok(Grant::Unresolved(UnresolvedPermission::new(
            permission.kind.clone(),
            permission.name.clone(),
            actions,
            certs,
        )));
    }

    let resolved: Result<Arc<dyn Permission>, EngineError> = match permission.kind.as_str() {
        ALL_PERMISSION_KIND => Ok(AllPermission.into_arc()),
        RUNTIME_PERMISSION_KIND => {
            BasicPermission::runtime(permission.name.clone()).map(BasicPermission::into_arc)
        }
        SECURITY_PERMISSION_KIND => {
            BasicPermission::security(permission.name.clone()).map(BasicPermission::into_arc)
        }
        PROPERTY_PERMISSION_KIND => PropertyPermission::new(permission.name.clone(), actions)
            .map(PropertyPermission::into_arc),
        _ => {
            return Ok(Grant::Unresolved(UnresolvedPermission::new(
                permission.kind.clone(),
                permission.name.clone(),
                actions,
                certs,
            )))
        }
    };

    resolved.map(Grant::Resolved).map_err(|e| {
        PolicyConfigError::InvalidGrant(format!("{} \"{}\": {e}", permission.kind, permission.name))
    })
}
