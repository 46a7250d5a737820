//! Caller identity and tenant scoping
//!
//! Identity is rebuilt from the bearer credential on every request and never
//! persisted. The namespace helpers here are the single place that decides
//! whether a caller may touch a tenant namespace.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Verified identity of the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    /// Token subject
    pub subject: String,
    /// Tenant the caller belongs to; equals the tenant namespace
    pub tenant_id: String,
    /// Admins may act on any tenant namespace
    pub is_admin: bool,
}

/// Which namespaces a list operation covers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListScope {
    /// One tenant namespace
    Namespace(String),
    /// Every namespace (admin only)
    All,
}

impl ListScope {
    /// Namespace filter for the resource client (None = all namespaces)
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Namespace(ns) => Some(ns),
            Self::All => None,
        }
    }
}

impl CallerIdentity {
    /// Resolve the namespace an operation targets.
    ///
    /// Without an explicit request the caller's own tenant namespace is used.
    /// A cross-tenant request is only honoured for admins.
    pub fn resolve_namespace(&self, requested: Option<&str>) -> Result<String, Error> {
        match requested.map(str::trim).filter(|ns| !ns.is_empty()) {
            None => {
                if self.tenant_id.is_empty() {
                    return Err(Error::validation(
                        "namespace is required for callers without a tenant",
                    ));
                }
                Ok(self.tenant_id.clone())
            }
            Some(ns) => {
                self.authorize_namespace(ns)?;
                Ok(ns.to_string())
            }
        }
    }

    /// Reject access to a namespace other than the caller's own unless admin
    pub fn authorize_namespace(&self, namespace: &str) -> Result<(), Error> {
        if self.is_admin || namespace == self.tenant_id {
            Ok(())
        } else {
            Err(Error::forbidden(format!(
                "tenant '{}' may not access namespace '{}'",
                self.tenant_id, namespace
            )))
        }
    }

    /// Resolve the scope of a list operation; `all` requires admin
    pub fn list_scope(&self, requested: Option<&str>, all: bool) -> Result<ListScope, Error> {
        if all {
            if !self.is_admin {
                return Err(Error::forbidden("listing all namespaces requires admin"));
            }
            return Ok(ListScope::All);
        }
        self.resolve_namespace(requested).map(ListScope::Namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> CallerIdentity {
        CallerIdentity {
            subject: format!("user@{}", id),
            tenant_id: id.to_string(),
            is_admin: false,
        }
    }

    fn admin() -> CallerIdentity {
        CallerIdentity {
            subject: "root".into(),
            tenant_id: "platform".into(),
            is_admin: true,
        }
    }

    #[test]
    fn defaults_to_own_namespace() {
        assert_eq!(tenant("tenant-a").resolve_namespace(None).unwrap(), "tenant-a");
        assert_eq!(
            tenant("tenant-a").resolve_namespace(Some("  ")).unwrap(),
            "tenant-a"
        );
    }

    #[test]
    fn cross_tenant_access_is_forbidden() {
        let err = tenant("tenant-a")
            .resolve_namespace(Some("tenant-b"))
            .unwrap_err();
        assert_eq!(err.kind(), "Forbidden");
    }

    #[test]
    fn admins_may_target_any_namespace() {
        assert_eq!(admin().resolve_namespace(Some("tenant-b")).unwrap(), "tenant-b");
    }

    #[test]
    fn list_all_requires_admin() {
        assert_eq!(tenant("tenant-a").list_scope(None, true).unwrap_err().kind(), "Forbidden");
        assert_eq!(admin().list_scope(None, true).unwrap(), ListScope::All);
        assert_eq!(
            tenant("tenant-a").list_scope(None, false).unwrap(),
            ListScope::Namespace("tenant-a".into())
        );
    }
}
