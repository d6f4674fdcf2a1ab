//! Turns raw listing posts into playable media records.
//!
//! Source selection is first-match over a fixed precedence list: a direct
//! `.mp4` link, a convertible `.gifv`/`.webm` link rewritten to `.mp4`, then
//! the fallback URL of the `secure_media`, `media` and preview video
//! descriptors, in that order. Posts matching none of these are dropped.

use serde::{Deserialize, Serialize};

use crate::reddit::{Post, PostMedia, RedditVideo};

const PLAYABLE_EXTENSION: &str = ".mp4";
const CONVERTIBLE_EXTENSIONS: [&str; 2] = [".gifv", ".webm"];

/// A post that resolved to a playable source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    #[serde(rename = "src")]
    pub source_url: String,
    pub author: String,
    /// Post fullname; doubles as the listing cursor.
    #[serde(rename = "name")]
    pub id: String,
    pub permalink: String,
    pub title: String,
    #[serde(rename = "thumbnail")]
    pub thumbnail_url: String,
    #[serde(rename = "comments")]
    pub comment_count: i64,
}

impl MediaRecord {
    pub fn from_post(post: &Post) -> Option<Self> {
        let source_url = best_source(post)?;
        Some(Self {
            source_url,
            author: post.author.clone(),
            id: post.name.clone(),
            permalink: post.permalink.clone(),
            title: post.title.clone(),
            thumbnail_url: post.thumbnail.clone(),
            comment_count: post.num_comments,
        })
    }
}

pub fn best_source(post: &Post) -> Option<String> {
    let url = post.url.trim();
    let (path, rest) = split_suffix(url);

    if path.ends_with(PLAYABLE_EXTENSION) {
        return Some(url.to_string());
    }

    for ext in CONVERTIBLE_EXTENSIONS {
        if let Some(stem) = path.strip_suffix(ext) {
            return Some(format!("{stem}{PLAYABLE_EXTENSION}{rest}"));
        }
    }

    fallback_from_media(post.secure_media.as_ref())
        .or_else(|| fallback_from_media(post.media.as_ref()))
        .or_else(|| {
            post.preview
                .as_ref()
                .and_then(|preview| fallback_url(preview.reddit_video_preview.as_ref()))
        })
}

fn fallback_from_media(media: Option<&PostMedia>) -> Option<String> {
    fallback_url(media?.reddit_video.as_ref())
}

fn fallback_url(video: Option<&RedditVideo>) -> Option<String> {
    let url = sanitize_url(&video?.fallback_url);
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

// Query string and fragment are carried over untouched when the extension is rewritten.
fn split_suffix(url: &str) -> (&str, &str) {
    match url.find(|c: char| c == '?' || c == '#') {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    }
}

fn sanitize_url(raw: &str) -> String {
    raw.trim().replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reddit::Preview;

    fn post(url: &str) -> Post {
        Post {
            id: "abc".into(),
            name: "t3_abc".into(),
            title: "A cat".into(),
            author: "someone".into(),
            url: url.into(),
            permalink: "/r/gifs/comments/abc/a_cat/".into(),
            num_comments: 12,
            thumbnail: "https://b.thumbs.redditmedia.com/abc.jpg".into(),
            ..Default::default()
        }
    }

    fn video(url: &str) -> Option<PostMedia> {
        Some(PostMedia {
            reddit_video: Some(RedditVideo {
                fallback_url: url.into(),
                ..Default::default()
            }),
        })
    }

    #[test]
    fn direct_mp4_is_used_verbatim() {
        let mut p = post("https://i.imgur.com/cat.mp4");
        p.secure_media = video("https://v.redd.it/other.mp4");
        assert_eq!(best_source(&p).as_deref(), Some("https://i.imgur.com/cat.mp4"));
    }

    #[test]
    fn convertible_extensions_become_mp4() {
        let p = post("https://i.imgur.com/cat.gifv");
        assert_eq!(best_source(&p).as_deref(), Some("https://i.imgur.com/cat.mp4"));

        let p = post("https://giant.example.com/clip.webm?raw=1");
        assert_eq!(
            best_source(&p).as_deref(),
            Some("https://giant.example.com/clip.mp4?raw=1")
        );
    }

    #[test]
    fn record_fields_copied_from_post() {
        let p = post("https://i.imgur.com/cat.gifv");
        let record = MediaRecord::from_post(&p).unwrap();
        assert_eq!(record.source_url, "https://i.imgur.com/cat.mp4");
        assert_eq!(record.id, "t3_abc");
        assert_eq!(record.author, "someone");
        assert_eq!(record.title, "A cat");
        assert_eq!(record.permalink, "/r/gifs/comments/abc/a_cat/");
        assert_eq!(record.thumbnail_url, "https://b.thumbs.redditmedia.com/abc.jpg");
        assert_eq!(record.comment_count, 12);
    }

    #[test]
    fn secure_media_wins_over_media() {
        let mut p = post("https://v.redd.it/abc");
        p.media = video("https://v.redd.it/abc/DASH_360.mp4");
        assert_eq!(
            best_source(&p).as_deref(),
            Some("https://v.redd.it/abc/DASH_360.mp4")
        );

        p.secure_media = video("https://v.redd.it/abc/DASH_720.mp4?source=fallback&amp;x=1");
        assert_eq!(
            best_source(&p).as_deref(),
            Some("https://v.redd.it/abc/DASH_720.mp4?source=fallback&x=1")
        );
    }

    #[test]
    fn preview_video_is_last_resort() {
        let mut p = post("https://i.redd.it/still.gif");
        p.preview = Some(Preview {
            enabled: true,
            reddit_video_preview: Some(RedditVideo {
                fallback_url: "https://v.redd.it/prev/DASH_240.mp4".into(),
                ..Default::default()
            }),
        });
        assert_eq!(
            best_source(&p).as_deref(),
            Some("https://v.redd.it/prev/DASH_240.mp4")
        );
    }

    #[test]
    fn posts_without_video_are_dropped() {
        let mut p = post("https://www.reddit.com/r/gifs/comments/abc/");
        p.media = Some(PostMedia { reddit_video: None });
        p.preview = Some(Preview::default());
        assert!(best_source(&p).is_none());
        assert!(MediaRecord::from_post(&p).is_none());
    }
}
