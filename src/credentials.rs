//! Credentials attached to the event connection.
//!
//! Token acquisition and refresh belong to the host application; the link
//! only asks for the current values each time it opens a connection.

use url::Url;

pub trait CredentialProvider: Send + Sync {
    /// Realm the connection belongs to.
    fn realm(&self) -> String;

    /// Full `Authorization` header value, if the user is authenticated.
    fn authorization_header(&self) -> Option<String>;
}

/// Fixed realm and optional bearer token.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    pub realm: String,
    pub token: Option<String>,
}

impl StaticCredentials {
    pub fn anonymous(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            token: None,
        }
    }

    pub fn bearer(realm: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            token: Some(token.into()),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn realm(&self) -> String {
        self.realm.clone()
    }

    fn authorization_header(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {token}"))
    }
}

/// Endpoint url with `Auth-Realm` and `Authorization` query parameters.
pub fn authorised_url(endpoint: &Url, credentials: &dyn CredentialProvider) -> Url {
    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("Auth-Realm", &credentials.realm());
        if let Some(header) = credentials.authorization_header() {
            query.append_pair("Authorization", &header);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_url_has_realm_only() {
        let endpoint = Url::parse("ws://localhost:8080/websocket/events").unwrap();
        let url = authorised_url(&endpoint, &StaticCredentials::anonymous("master"));
        assert_eq!(
            url.as_str(),
            "ws://localhost:8080/websocket/events?Auth-Realm=master"
        );
    }

    #[test]
    fn test_bearer_token_is_encoded() {
        let endpoint = Url::parse("wss://demo.example.com/websocket/events").unwrap();
        let url = authorised_url(&endpoint, &StaticCredentials::bearer("smartcity", "abc.def"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Auth-Realm".to_string(), "smartcity".to_string()),
                ("Authorization".to_string(), "Bearer abc.def".to_string()),
            ]
        );
        assert!(url.as_str().contains("Authorization=Bearer+abc.def"));
    }
}
