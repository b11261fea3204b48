use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use std::collections::BTreeMap;

/// Header carrying the server's machine-readable error code.
const ERROR_CODE_HEADER: &str = "x-larder-error";

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

/// One line of the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTime {
    pub unix_seconds: i64,
    pub path: String,
}

/// One cache file found on the server's disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub available: bool,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// A writer holds the path; retry later.
    Busy,
    /// Nothing was on disk. Any in-memory state is gone regardless.
    Missing,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    fn url_with_path_param(&self, endpoint: &str, path: &str) -> Result<Url> {
        let mut url = self.url(endpoint)?;
        url.query_pairs_mut().append_pair("path", path);
        Ok(url)
    }

    async fn send_text(&self, req: reqwest::RequestBuilder) -> Result<String> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body.trim_end());
        }
        Ok(body)
    }

    pub async fn stat(&self) -> Result<String> {
        let url = self.url("/stat")?;
        self.send_text(self.http.get(url)).await
    }

    pub async fn active(&self) -> Result<String> {
        let url = self.url("/stat/active")?;
        self.send_text(self.http.get(url)).await
    }

    pub async fn list_paths(&self) -> Result<Vec<String>> {
        let url = self.url("/admin/list/paths")?;
        let body = self.send_text(self.http.get(url)).await?;
        Ok(body.lines().map(str::to_string).collect())
    }

    /// Access log, least recently used first.
    pub async fn access_times(&self, limit: Option<usize>) -> Result<Vec<AccessTime>> {
        let mut url = self.url("/admin/list/access-times")?;
        if let Some(limit) = limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        let body = self.send_text(self.http.get(url)).await?;

        body.lines()
            .map(|line| {
                let (secs, path) = line
                    .split_once(' ')
                    .with_context(|| format!("malformed access time line: {line}"))?;
                Ok(AccessTime {
                    unix_seconds: secs
                        .parse()
                        .with_context(|| format!("malformed access time: {secs}"))?,
                    path: path.to_string(),
                })
            })
            .collect()
    }

    pub async fn list_disk(&self) -> Result<Vec<DiskEntry>> {
        let url = self.url("/admin/list/disk")?;
        let body = self.send_text(self.http.get(url)).await?;

        body.lines()
            .map(|line| match line.split_once(' ') {
                Some(("available", path)) => Ok(DiskEntry {
                    available: true,
                    path: path.to_string(),
                }),
                Some(("orphan", path)) => Ok(DiskEntry {
                    available: false,
                    path: path.to_string(),
                }),
                _ => anyhow::bail!("malformed disk listing line: {line}"),
            })
            .collect()
    }

    pub async fn path_headers(&self, path: &str) -> Result<BTreeMap<String, Vec<String>>> {
        let url = self.url_with_path_param("/admin/path-headers", path)?;
        let body = self.send_text(self.http.get(url)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn available_size(&self) -> Result<u64> {
        let url = self.url("/admin/available-size")?;
        let body = self.send_text(self.http.get(url)).await?;
        body.trim()
            .parse()
            .with_context(|| format!("malformed size: {}", body.trim()))
    }

    /// Mark `path` for re-fetch on its next request.
    pub async fn purge(&self, path: &str) -> Result<()> {
        let mut url = self.base_url.clone();
        url.set_path(path);
        self.send_text(self.http.delete(url)).await?;
        Ok(())
    }

    /// Remove the cached copy of `path`.
    pub async fn delete_path(&self, path: &str) -> Result<DeleteOutcome> {
        let url = self.url_with_path_param("/admin/delete-path", path)?;
        let response = self.http.post(url).send().await?;
        let status = response.status();
        let code = response
            .headers()
            .get(ERROR_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        match (status, code.as_deref()) {
            (s, _) if s.is_success() => Ok(DeleteOutcome::Deleted),
            (StatusCode::CONFLICT, Some("busy")) => Ok(DeleteOutcome::Busy),
            (StatusCode::NOT_FOUND, _) => Ok(DeleteOutcome::Missing),
            _ => anyhow::bail!("API error ({}): {}", status, body.trim_end()),
        }
    }
}
