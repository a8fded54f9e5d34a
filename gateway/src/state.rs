use reqwest::Client;

#[derive(Clone)]
pub struct GatewayState {
    /// Registry RPCs (allocate, commit, admin proxies).
    pub registry_client: Client,
    /// Byte pushes to storage nodes; longer timeout.
    pub upload_client: Client,
    pub naming_url: String,
}
