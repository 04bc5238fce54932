/// The available authentication modes for the director/repo HTTP
/// transport: the core doesn't inspect
/// which one is active, only the config loader and the HTTP collaborator
/// care.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Auth {
    None,
    Credentials(ClientCredentials),
    Token(AccessToken),
    Provision,
    Certificate,
}

/// The client id and secret used during OAuth2 client-credentials
/// authentication.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// The returned access token data following a successful authentication.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i32,
    pub scope: String,
}
