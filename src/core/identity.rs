//! Who is running a migration, recorded on change and lock records.

/// Supplies the `runner` string stamped on records.
pub trait IdentityProvider {
    fn runner(&self) -> String;
}

/// The OS user, from `USER` or `USERNAME`; `unknown` when neither is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsUserIdentity;

impl IdentityProvider for OsUserIdentity {
    fn runner(&self) -> String {
        ["USER", "USERNAME"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// A fixed runner name, e.g. from configuration.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub String);

impl IdentityProvider for FixedIdentity {
    fn runner(&self) -> String {
        self.0.clone()
    }
}
