use std::time::Duration;

use url::Url;

use crate::config::HTTP_TIMEOUT_SECS;

/// Just a wrapper around a URL and credentials
#[derive(Clone, Debug)]
pub struct Resource {
    url: Url,
    username: String,
    password: String,
    verify_ssl: bool,
}

impl Resource {
    pub fn new(url: Url, username: String, password: String, verify_ssl: bool) -> Self {
        Self { url, username, password, verify_ssl }
    }

    pub fn url(&self) -> &Url { &self.url }
    pub fn username(&self) -> &String { &self.username }
    pub fn password(&self) -> &String { &self.password }
    pub fn verify_ssl(&self) -> bool { self.verify_ssl }

    /// Build a new Resource by keeping the same credentials, scheme and server from `base` but changing the path part
    pub fn combine(&self, new_path: &str) -> Resource {
        let mut built = (*self).clone();
        built.url.set_path(&new_path);
        built
    }

    /// An HTTP client that honours the TLS settings of this resource
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()
    }
}
