use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com/";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    pub after: Option<String>,
    pub limit: Option<u32>,
}

impl ListingOptions {
    fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        if let Some(after) = self.after {
            if !after.is_empty() {
                params.push(("after".into(), after));
            }
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    #[default]
    Hot,
    New,
}

impl SortOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOption::Hot => "hot",
            SortOption::New => "new",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "hot" => Some(SortOption::Hot),
            "new" => Some(SortOption::New),
            _ => None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("reddit client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base).with_context(|| format!("reddit: parse base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => {
                let mut builder = HttpClient::builder();
                if let Some(timeout) = config.timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build().context("reddit: build http client")?
            }
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn subreddit_listing(
        &self,
        subreddit: &str,
        sort: SortOption,
        opts: ListingOptions,
    ) -> Result<Listing<Post>> {
        let name = subreddit.trim().trim_start_matches("r/").trim_matches('/');
        if name.is_empty() {
            bail!("reddit: subreddit name required");
        }
        let path = format!("/r/{}/{}.json", name, sort.as_str());
        self.fetch_listing(&path, opts)
    }

    fn fetch_listing<T>(&self, path: &str, opts: ListingOptions) -> Result<Listing<T>>
    where
        T: DeserializeOwned,
    {
        let params = opts.into_params();
        let resp = self.get(path, &params)?;
        let listing: ListingEnvelope<T> = resp.json().context("reddit: decode listing")?;
        Ok(listing.data)
    }

    fn get(&self, path: &str, params: &[(String, String)]) -> Result<Response> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                403 => Err(anyhow!("reddit: forbidden")),
                404 => Err(anyhow!("reddit: not found")),
                429 => Err(anyhow!("reddit: rate limited: {}", body)),
                _ => Err(anyhow!("reddit: api error {}: {}", status, body)),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Listing<T> {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    #[serde(default)]
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    /// Fullname (`t3_...`), used as the `after` cursor.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub media: Option<PostMedia>,
    #[serde(default)]
    pub secure_media: Option<PostMedia>,
    #[serde(default)]
    pub preview: Option<Preview>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostMedia {
    #[serde(default)]
    pub reddit_video: Option<RedditVideo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preview {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub reddit_video_preview: Option<RedditVideo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedditVideo {
    #[serde(default)]
    pub fallback_url: String,
    #[serde(default)]
    pub is_gif: bool,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    #[serde(default)]
    kind: String,
    data: Listing<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> Client {
        Client::new(ClientConfig {
            user_agent: "gifreel-test/0.1".into(),
            base_url: Some(server.url()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn rejects_empty_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }

    #[test]
    fn listing_request_carries_limit_and_cursor() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/r/gifs/new.json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "100".into()),
                Matcher::UrlEncoded("after".into(), "t3_abc".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"kind":"Listing","data":{"after":"t3_def","children":[
                    {"kind":"t3","data":{"id":"def","name":"t3_def","title":"cat","author":"bob",
                     "url":"https://i.imgur.com/x.gifv","permalink":"/r/gifs/comments/def/",
                     "num_comments":3,"thumbnail":"https://t/x.jpg",
                     "secure_media":{"reddit_video":{"fallback_url":"https://v.redd.it/def/DASH_480.mp4"}}}}
                ]}}"#,
            )
            .create();

        let listing = client_for(&server)
            .subreddit_listing(
                "r/gifs",
                SortOption::New,
                ListingOptions {
                    after: Some("t3_abc".into()),
                    limit: Some(100),
                },
            )
            .unwrap();

        mock.assert();
        assert_eq!(listing.after.as_deref(), Some("t3_def"));
        let post = &listing.children[0].data;
        assert_eq!(post.name, "t3_def");
        assert_eq!(post.num_comments, 3);
        let video = post
            .secure_media
            .as_ref()
            .and_then(|m| m.reddit_video.as_ref())
            .unwrap();
        assert_eq!(video.fallback_url, "https://v.redd.it/def/DASH_480.mp4");
        assert!(post.media.is_none());
    }

    #[test]
    fn surfaces_http_errors() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/r/private/hot.json")
            .match_query(Matcher::Any)
            .with_status(403)
            .create();
        let err = client_for(&server)
            .subreddit_listing("private", SortOption::Hot, ListingOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn listing_without_children_decodes_empty() {
        let envelope: ListingEnvelope<Post> =
            serde_json::from_str(r#"{"kind":"Listing","data":{"after":null}}"#).unwrap();
        assert!(envelope.data.children.is_empty());
        assert!(envelope.data.after.is_none());
    }

    #[test]
    fn sort_keys_parse() {
        assert_eq!(SortOption::from_key("NEW"), Some(SortOption::New));
        assert_eq!(SortOption::from_key(" hot "), Some(SortOption::Hot));
        assert_eq!(SortOption::from_key("top"), None);
    }
}
