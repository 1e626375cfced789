use axum::http::HeaderMap;
use uuid::Uuid;

// Clients send back whatever token we hand them; an authenticated user id
// travels through the same header.
pub const VOTER_HEADER: &str = "x-voter-id";

const MAX_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct Voter {
    pub id: String,
    // True when the token was minted on this request and the client still
    // has to persist it from the response header.
    pub minted: bool,
}

// Resolves the caller's voter identity: the header value when present and
// well-formed, otherwise a freshly minted device token. Duplicate votes
// across cleared storage or multiple devices are out of reach of this scheme.
pub fn resolve_voter(headers: &HeaderMap) -> Voter {
    let supplied = headers
        .get(VOTER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| is_valid_token(token));

    match supplied {
        Some(token) => Voter { id: token.to_string(), minted: false },
        None => Voter { id: Uuid::new_v4().to_string(), minted: true },
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
