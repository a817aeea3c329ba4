use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Provider-verified profile claims presented at the OAuth callback
/// boundary. The exchange itself happens upstream; the service only mints
/// its own bearer token from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}
