use super::*;
use axum::http::HeaderMap;

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", value.parse().unwrap());
    headers
}

#[cfg(test)]
mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let headers = headers_with("Bearer Zx81kQ0aTfLmW2pR");

        let result = extract_bearer_token(&headers);
        assert_eq!(result.unwrap(), "Zx81kQ0aTfLmW2pR");
    }

    #[test]
    fn valid_bearer_token_with_extra_whitespace() {
        let headers = headers_with("Bearer   Zx81kQ0aTfLmW2pR  ");

        let result = extract_bearer_token(&headers);
        assert_eq!(result.unwrap(), "Zx81kQ0aTfLmW2pR");
    }

    #[test]
    fn case_insensitive_bearer() {
        let headers = headers_with("bearer Zx81kQ0aTfLmW2pR");

        let result = extract_bearer_token(&headers);
        assert_eq!(result.unwrap(), "Zx81kQ0aTfLmW2pR");
    }

    #[test]
    fn missing_authorization_header() {
        let headers = HeaderMap::new();
        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::Missing));
    }

    #[test]
    fn missing_bearer_prefix() {
        let headers = headers_with("Zx81kQ0aTfLmW2pR");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn wrong_auth_scheme() {
        let headers = headers_with("Basic dXNlcjpwYXNz");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_with_empty_token() {
        let headers = headers_with("Bearer  ");

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod authenticate_tests {
    use super::*;
    use crate::store::testing;

    #[test]
    fn resolves_user_from_token() {
        let store = testing::store();
        let alice = store.create_user("alice").unwrap();

        let headers = headers_with(&format!("Bearer {}", alice.token));
        let user = authenticate(&headers, &store).unwrap();
        assert_eq!(user.id, alice.id);
    }

    #[test]
    fn unknown_token_rejected() {
        let store = testing::store();
        store.create_user("alice").unwrap();

        let headers = headers_with("Bearer not-a-real-token");
        assert!(matches!(
            authenticate(&headers, &store),
            Err(AuthError::UnknownToken)
        ));
    }

    #[test]
    fn missing_header_rejected() {
        let store = testing::store();
        assert!(matches!(
            authenticate(&HeaderMap::new(), &store),
            Err(AuthError::InvalidToken(TokenError::Missing))
        ));
    }
}

#[cfg(test)]
mod admin_tests {
    use super::*;

    #[test]
    fn open_when_no_admin_token_configured() {
        assert!(is_admin(&HeaderMap::new(), None));
    }

    #[test]
    fn requires_matching_token() {
        assert!(is_admin(&headers_with("Bearer s3cret"), Some("s3cret")));
        assert!(!is_admin(&headers_with("Bearer wrong"), Some("s3cret")));
        assert!(!is_admin(&HeaderMap::new(), Some("s3cret")));
    }
}
