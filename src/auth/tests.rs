use super::*;
use axum::http::HeaderMap;

fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn config(enabled: bool) -> AuthConfig {
    AuthConfig {
        enabled,
        tokens: [("tok-alice".to_string(), "alice".to_string())]
            .into_iter()
            .collect(),
        default_world: None,
    }
}

#[cfg(test)]
mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            "Bearer 550e8400-e29b-41d4-a716-446655440000"
                .parse()
                .unwrap(),
        );

        let result = extract_bearer_token(&headers);
        assert_eq!(result.unwrap(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn case_insensitive_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "bearer abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc");
    }

    #[test]
    fn missing_authorization_header() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Missing));
    }

    #[test]
    fn missing_bearer_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "abc".parse().unwrap());
        assert_eq!(
            extract_bearer_token(&headers),
            Err(TokenError::InvalidFormat)
        );
    }

    #[test]
    fn empty_token_after_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer   ".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod credential_tests {
    use super::*;

    #[test]
    fn reads_query_parameters() {
        let credential = Credential::from_request(
            &query(&[("token", "tok-alice"), ("world", "w1"), ("session", "")]),
            &HeaderMap::new(),
        )
        .unwrap();

        assert_eq!(credential.token.as_deref(), Some("tok-alice"));
        assert_eq!(credential.world.as_deref(), Some("w1"));
        assert_eq!(credential.session, None);
    }

    #[test]
    fn falls_back_to_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok-alice".parse().unwrap());

        let credential = Credential::from_request(&query(&[]), &headers).unwrap();
        assert_eq!(credential.token.as_deref(), Some("tok-alice"));
    }

    #[test]
    fn no_token_is_not_an_extraction_error() {
        let credential = Credential::from_request(&query(&[]), &HeaderMap::new()).unwrap();
        assert_eq!(credential.token, None);
    }

    #[test]
    fn empty_query_token_rejected() {
        let result = Credential::from_request(&query(&[("token", " ")]), &HeaderMap::new());
        assert_eq!(result, Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod authenticator_tests {
    use super::*;

    #[tokio::test]
    async fn configured_token_authenticates() {
        let auth = TokenAuthenticator::new(&config(true));
        let principal = auth
            .authenticate(&Credential {
                token: Some("tok-alice".to_string()),
                ..Credential::default()
            })
            .await
            .unwrap();

        assert_eq!(principal, Principal::named("alice"));
    }

    #[tokio::test]
    async fn unknown_token_unauthorized() {
        let auth = TokenAuthenticator::new(&config(true));
        let err = auth
            .authenticate(&Credential {
                token: Some("nope".to_string()),
                ..Credential::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HostError::Unauthorized(_)));
        assert_eq!(err.close_code(), crate::error::close_code::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_token_unauthorized() {
        let auth = TokenAuthenticator::new(&config(true));
        let err = auth.authenticate(&Credential::default()).await.unwrap_err();
        assert!(matches!(err, HostError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn disabled_auth_is_anonymous() {
        let auth = TokenAuthenticator::new(&config(false));
        let a = auth.authenticate(&Credential::default()).await.unwrap();
        let b = auth.authenticate(&Credential::default()).await.unwrap();

        assert!(a.anonymous);
        assert!(a.id.starts_with("anon_"));
        assert_ne!(a, b);
    }
}
