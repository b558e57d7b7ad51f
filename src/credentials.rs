//! Session-scoped credential store.
//!
//! Holds one [`Credential`] per provider id for the lifetime of the process
//! and answers the completeness question the rest of the crate gates on:
//! "is provider X usable right now". Nothing here touches the network or
//! disk, and nothing here reads the environment — seeding credentials is the
//! embedding application's job.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::registry::{ProviderDescriptor, ProviderRegistry};

/// A named bag of secrets/config for one provider.
///
/// Field names are free-form: unknown keys are stored untouched (forward
/// compatibility), but completeness only consults the fields the provider's
/// descriptor actually requires.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    fields: HashMap<String, String>,
}

impl Credential {
    /// Create an empty credential.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a credential from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Whether a field is present and non-empty.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.trim().is_empty())
    }

    /// Get a field value, falling back to `default` when absent or empty.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => v,
            _ => default,
        }
    }
}

/// In-memory store of per-provider credentials.
///
/// Writes are serialized through the lock; reads snapshot the single entry
/// they need, so concurrent completeness checks never block each other for
/// long. State lives for the session only — persistence, if any, belongs to
/// an outer layer.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (overwrite) the credential for a provider.
    ///
    /// Field names are not validated against the registry; a caller may
    /// store fields this version does not know about yet.
    pub fn set(&self, provider_id: impl Into<String>, credential: Credential) {
        self.entries
            .write()
            .expect("credential lock poisoned")
            .insert(provider_id.into(), credential);
    }

    /// Get a copy of the credential for a provider.
    pub fn get(&self, provider_id: &str) -> Option<Credential> {
        self.entries
            .read()
            .expect("credential lock poisoned")
            .get(provider_id)
            .cloned()
    }

    /// Remove the credential for a provider.
    pub fn clear(&self, provider_id: &str) {
        self.entries
            .write()
            .expect("credential lock poisoned")
            .remove(provider_id);
    }

    /// Remove every stored credential.
    pub fn clear_all(&self) {
        self.entries
            .write()
            .expect("credential lock poisoned")
            .clear();
    }

    /// The required fields of `descriptor` that are absent or empty.
    ///
    /// When the provider does not authenticate with an API key, the api_key
    /// field is exempt from the check even if listed.
    pub fn missing_fields(&self, descriptor: &ProviderDescriptor) -> Vec<String> {
        let credential = self.get(&descriptor.id).unwrap_or_default();
        descriptor
            .credential_requirements()
            .iter()
            .filter(|field| {
                if field.key() == "api_key" && !descriptor.requires_api_key() {
                    return false;
                }
                !credential.has(field.key())
            })
            .map(|field| field.key().to_string())
            .collect()
    }

    /// Whether every required field of `descriptor` is present and non-empty.
    pub fn is_configured(&self, descriptor: &ProviderDescriptor) -> bool {
        self.missing_fields(descriptor).is_empty()
    }

    /// Ids of all registry providers that pass the completeness check.
    pub fn configured_providers(&self, registry: &ProviderRegistry) -> Vec<String> {
        registry
            .list()
            .iter()
            .filter(|d| self.is_configured(d))
            .map(|d| d.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderRegistry;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::builtin()
    }

    #[test]
    fn api_key_provider_completeness() {
        let registry = registry();
        let openai = registry.get("openai").unwrap();
        let store = CredentialStore::new();

        assert!(!store.is_configured(&openai));
        assert_eq!(store.missing_fields(&openai), vec!["api_key"]);

        store.set("openai", Credential::from_pairs([("api_key", "sk-test")]));
        assert!(store.is_configured(&openai));
    }

    #[test]
    fn empty_value_does_not_count() {
        let registry = registry();
        let openai = registry.get("openai").unwrap();
        let store = CredentialStore::new();

        store.set("openai", Credential::from_pairs([("api_key", "  ")]));
        assert!(!store.is_configured(&openai));
    }

    #[test]
    fn endpoint_provider_reports_each_missing_field() {
        let registry = registry();
        let azure = registry.get("azure_openai").unwrap();
        let store = CredentialStore::new();

        store.set(
            "azure_openai",
            Credential::from_pairs([("api_key", "azure-key")]),
        );
        assert!(!store.is_configured(&azure));
        assert_eq!(store.missing_fields(&azure), vec!["endpoint"]);

        store.set(
            "azure_openai",
            Credential::from_pairs([
                ("api_key", "azure-key"),
                ("endpoint", "https://myres.openai.azure.com"),
            ]),
        );
        assert!(store.is_configured(&azure));
    }

    #[test]
    fn keyless_provider_checks_other_fields_only() {
        let registry = registry();
        let ollama = registry.get("ollama").unwrap();
        let vertex = registry.get("google_vertexai").unwrap();
        let store = CredentialStore::new();

        // base_url-only: configured once the URL is set, no api_key needed
        assert!(!store.is_configured(&ollama));
        store.set(
            "ollama",
            Credential::from_pairs([("base_url", "http://localhost:11434")]),
        );
        assert!(store.is_configured(&ollama));

        // project-located: the project gates completeness
        assert_eq!(store.missing_fields(&vertex), vec!["project"]);
        store.set(
            "google_vertexai",
            Credential::from_pairs([("project", "my-gcp-project")]),
        );
        assert!(store.is_configured(&vertex));
    }

    #[test]
    fn unknown_fields_are_kept_but_ignored() {
        let registry = registry();
        let openai = registry.get("openai").unwrap();
        let store = CredentialStore::new();

        store.set(
            "openai",
            Credential::from_pairs([("api_key", "sk-test"), ("org_id", "org-123")]),
        );
        assert!(store.is_configured(&openai));
        assert_eq!(
            store.get("openai").unwrap().get("org_id"),
            Some("org-123")
        );
    }

    #[test]
    fn set_overwrites_previous_entry() {
        let store = CredentialStore::new();
        store.set("openai", Credential::from_pairs([("api_key", "old")]));
        store.set("openai", Credential::from_pairs([("api_key", "new")]));
        assert_eq!(store.get("openai").unwrap().get("api_key"), Some("new"));
    }

    #[test]
    fn clear_and_clear_all() {
        let registry = registry();
        let store = CredentialStore::new();
        store.set("openai", Credential::from_pairs([("api_key", "a")]));
        store.set("groq", Credential::from_pairs([("api_key", "b")]));

        store.clear("openai");
        assert!(store.get("openai").is_none());
        assert!(store.get("groq").is_some());

        store.clear_all();
        assert!(store.configured_providers(&registry).is_empty());
    }

    #[test]
    fn configured_providers_lists_complete_entries() {
        let registry = registry();
        let store = CredentialStore::new();
        store.set("openai", Credential::from_pairs([("api_key", "sk")]));
        store.set(
            "azure_openai",
            Credential::from_pairs([("api_key", "incomplete")]),
        );

        let configured = store.configured_providers(&registry);
        assert!(configured.contains(&"openai".to_string()));
        assert!(!configured.contains(&"azure_openai".to_string()));
    }

    #[test]
    fn credential_get_or_default() {
        let credential = Credential::from_pairs([("location", "")]);
        assert_eq!(credential.get_or("location", "us-central1"), "us-central1");
        assert_eq!(credential.get_or("region", "us-east-1"), "us-east-1");

        let credential = Credential::from_pairs([("location", "europe-west4")]);
        assert_eq!(credential.get_or("location", "us-central1"), "europe-west4");
    }
}
