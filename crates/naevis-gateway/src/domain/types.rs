//! Musicon documents and request bodies.
//!
//! Field names follow the stored JSON (`playlistid`, `userid`, `coverUrl`),
//! which the web client also reads.

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

pub const MAX_PLAYLIST_NAME: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub playlistid: String,
    pub userid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "coverUrl", skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub songs: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub duration: u64,
    #[serde(default, rename = "isCompilation")]
    pub is_compilation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyrights: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub albumid: String,
    pub artistid: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "releaseDate")]
    pub release_date: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub songs: Vec<String>,
    #[serde(default, rename = "coverUrl")]
    pub cover_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub songid: String,
    pub artistid: String,
    pub title: String,
    #[serde(default)]
    pub genre: String,
    /// Display string such as `"3:42"`
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "audioUrl")]
    pub audio_url: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub plays: u64,
    #[serde(default, rename = "uploadedAt")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub poster: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub audioextn: String,
    #[serde(default)]
    pub posterextn: String,
}

/// A user's like of one song. Stored under `"<userid>:<songid>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Like {
    pub userid: String,
    pub songid: String,
    #[serde(rename = "likedAt")]
    pub liked_at: DateTime<Utc>,
}

impl Like {
    pub fn key(userid: &str, songid: &str) -> String {
        format!("{userid}:{songid}")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePlaylist {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePlaylist {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "coverUrl")]
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddSong {
    pub songid: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAlbum {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "releaseDate")]
    pub release_date: String,
    #[serde(default, rename = "coverUrl")]
    pub cover_url: String,
    #[serde(default)]
    pub songs: Vec<String>,
    #[serde(default)]
    pub published: bool,
}

/// `?limit=&page=` with the deployment defaults. Non-positive or unparsable
/// values fall back to the default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<String>,
    pub page: Option<String>,
}

impl PageParams {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 100;

    pub fn limit(&self) -> usize {
        positive(self.limit.as_deref())
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT)
    }

    pub fn page(&self) -> usize {
        positive(self.page.as_deref()).unwrap_or(1)
    }

    pub fn skip(&self) -> usize {
        (self.page() - 1).saturating_mul(self.limit())
    }
}

fn positive(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

/// Validate a playlist name: 1 to 100 characters.
pub fn valid_playlist_name(name: &str) -> bool {
    let len = name.chars().count();
    (1..=MAX_PLAYLIST_NAME).contains(&len)
}

/// `prefix` followed by 12 random alphanumerics.
pub fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(limit: Option<&str>, page: Option<&str>) -> PageParams {
        PageParams {
            limit: limit.map(str::to_string),
            page: page.map(str::to_string),
        }
    }

    #[test]
    fn test_page_defaults() {
        let p = page(None, None);
        assert_eq!((p.limit(), p.page(), p.skip()), (20, 1, 0));
    }

    #[test]
    fn test_page_ignores_non_positive() {
        let p = page(Some("-5"), Some("0"));
        assert_eq!((p.limit(), p.page()), (20, 1));
        let p = page(Some("abc"), Some("3"));
        assert_eq!(p.skip(), 40);
    }

    #[test]
    fn test_page_limit_capped() {
        assert_eq!(page(Some("5000"), None).limit(), PageParams::MAX_LIMIT);
    }

    #[test]
    fn test_playlist_name_bounds() {
        assert!(!valid_playlist_name(""));
        assert!(valid_playlist_name("Road trip"));
        assert!(valid_playlist_name(&"x".repeat(100)));
        assert!(!valid_playlist_name(&"x".repeat(101)));
    }

    #[test]
    fn test_generated_ids() {
        let id = generate_id("pl_");
        assert!(id.starts_with("pl_"));
        assert_eq!(id.len(), 15);
        assert!(id[3..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_id("pl_"), id);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let ok: Result<CreatePlaylist, _> = serde_json::from_str(r#"{"name":"a"}"#);
        assert!(ok.is_ok());
        let bad: Result<CreatePlaylist, _> =
            serde_json::from_str(r#"{"name":"a","owner":"someone-else"}"#);
        assert!(bad.is_err());
    }
}
