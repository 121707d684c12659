use reqwest::blocking::Client;

const APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Redirects followed before a request is given up on. The firmware links point at a CDN.
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed initializing HTTP client")]
    BuildClient(#[source] reqwest::Error),
}

/// Returns an HTTP client with explicit reasonable defaults.
///
/// Timeouts are set per request, since fetching release info and downloading an image have
/// very different bounds. `https_only` is only ever turned off to test against a local server.
pub fn build(https_only: bool) -> Result<Client, Error> {
    // We explicitly do not pin certificates and default to the system's root CAs, so that a
    // router that went without updates for a long time can still reach the firmware api.
    Client::builder()
        .tls_built_in_root_certs(true)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .https_only(https_only)
        .user_agent(APP_USER_AGENT)
        .build()
        .map_err(Error::BuildClient)
}
