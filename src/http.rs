use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;

/// Fetch text or files over HTTP.
pub trait Fetch {
    fn text(&self, url: &str) -> Result<String>;
    /// Save the body at `url` into `path`, returning the number of bytes written.
    fn download(&self, url: &str, path: &str) -> Result<u64>;
}

/// Blocking reqwest client.
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new() -> Result<HttpClient> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("biowrangle/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpClient { client })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        log::debug!("GET {}", url);
        self.client
            .get(url)
            .send()
            .with_context(|| format!("Could not fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Could not fetch {}", url))
    }
}

impl Fetch for HttpClient {
    fn text(&self, url: &str) -> Result<String> {
        self.get(url)?
            .text()
            .with_context(|| format!("Could not read response from {}", url))
    }

    fn download(&self, url: &str, path: &str) -> Result<u64> {
        let mut response = self.get(url)?;
        let file = File::create(path).with_context(|| format!("couldn't create {}", path))?;
        let mut writer = BufWriter::new(file);
        response
            .copy_to(&mut writer)
            .with_context(|| format!("Failed to download {} to {}", url, path))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Canned responses keyed by URL, recording every request.
    #[derive(Default)]
    pub struct MockFetch {
        pub pages: HashMap<String, String>,
        pub requests: RefCell<Vec<String>>,
    }

    impl MockFetch {
        pub fn with(pages: &[(&str, &str)]) -> MockFetch {
            MockFetch {
                pages: pages
                    .iter()
                    .map(|(u, b)| (u.to_string(), b.to_string()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl Fetch for MockFetch {
        fn text(&self, url: &str) -> Result<String> {
            self.requests.borrow_mut().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .with_context(|| format!("404 {}", url))
        }

        fn download(&self, url: &str, path: &str) -> Result<u64> {
            let body = self.text(url)?;
            std::fs::write(path, &body)?;
            Ok(body.len() as u64)
        }
    }
}
