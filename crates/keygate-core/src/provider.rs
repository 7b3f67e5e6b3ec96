//! The closed set of identity-provider families.
//!
//! Resolved once at configuration load: an explicit `provider_type` wins,
//! otherwise the family is detected from a well-known domain suffix.
//! Endpoint shapes and per-family quirks live with the auth flow; this is
//! only the vocabulary configuration validation needs.

/// Supported identity-provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Okta,
    Auth0,
    AzureAd,
    Cognito,
}

impl ProviderKind {
    /// Parse an explicit `provider_type` configuration value.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "okta" => Some(ProviderKind::Okta),
            "auth0" => Some(ProviderKind::Auth0),
            "azure" => Some(ProviderKind::AzureAd),
            "cognito" => Some(ProviderKind::Cognito),
            _ => None,
        }
    }

    /// Detect the family from a well-known domain suffix.
    pub fn detect(host: &str) -> Option<Self> {
        const SUFFIXES: &[(&str, ProviderKind)] = &[
            (".okta.com", ProviderKind::Okta),
            (".oktapreview.com", ProviderKind::Okta),
            (".okta-emea.com", ProviderKind::Okta),
            (".auth0.com", ProviderKind::Auth0),
            (".microsoftonline.com", ProviderKind::AzureAd),
            (".windows.net", ProviderKind::AzureAd),
            (".amazoncognito.com", ProviderKind::Cognito),
        ];
        SUFFIXES
            .iter()
            .find(|(suffix, _)| host.ends_with(suffix))
            .map(|(_, kind)| *kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Okta => "okta",
            ProviderKind::Auth0 => "auth0",
            ProviderKind::AzureAd => "azure",
            ProviderKind::Cognito => "cognito",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_names() {
        assert_eq!(ProviderKind::parse("okta"), Some(ProviderKind::Okta));
        assert_eq!(ProviderKind::parse("auth0"), Some(ProviderKind::Auth0));
        assert_eq!(ProviderKind::parse("azure"), Some(ProviderKind::AzureAd));
        assert_eq!(ProviderKind::parse("cognito"), Some(ProviderKind::Cognito));
        assert_eq!(ProviderKind::parse("keycloak"), None);
    }

    #[test]
    fn test_detection_from_domain_suffix() {
        assert_eq!(ProviderKind::detect("acme.okta.com"), Some(ProviderKind::Okta));
        assert_eq!(
            ProviderKind::detect("dev-123.us.auth0.com"),
            Some(ProviderKind::Auth0)
        );
        assert_eq!(
            ProviderKind::detect("login.microsoftonline.com"),
            Some(ProviderKind::AzureAd)
        );
        assert_eq!(
            ProviderKind::detect("auth.us-east-1.amazoncognito.com"),
            Some(ProviderKind::Cognito)
        );
        assert_eq!(ProviderKind::detect("idp.example.com"), None);
    }
}
