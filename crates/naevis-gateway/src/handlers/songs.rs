//! Song listing and recommendation routes.

use super::respond::{decode_all, Reply, StoreResultExt};
use super::AppState;
use crate::domain::error::ApiResult;
use crate::domain::types::{PageParams, Song};
use axum::extract::{Path, Query as QueryParams, State};
use naevis_store::{collections, Query};
use serde::Deserialize;

/// Resolve song ids to published songs. Unknown and unpublished ids are
/// dropped.
pub(crate) async fn published_songs(state: &AppState, ids: Vec<String>) -> ApiResult<Vec<Song>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let query = Query::new().any_of("songid", ids).eq("published", true);
    let docs = state
        .store
        .find(collections::SONGS, &query)
        .await
        .or_api("fetch songs")?;
    decode_all(docs, "songs")
}

fn published_page(page: &PageParams) -> Query {
    Query::new()
        .eq("published", true)
        .skip(page.skip())
        .limit(page.limit())
}

/// GET /artists/:artistid/songs
pub async fn artist_songs(
    State(state): State<AppState>,
    Path(artist_id): Path<String>,
    QueryParams(page): QueryParams<PageParams>,
) -> ApiResult<Reply<Vec<Song>>> {
    let query = published_page(&page).eq("artistid", artist_id.as_str());
    let docs = state
        .store
        .find(collections::SONGS, &query)
        .await
        .or_api("fetch artist songs")?;
    Ok(Reply::ok(
        decode_all(docs, "songs")?,
        format!("Songs for artist {artist_id} fetched"),
    ))
}

/// GET /recommended
pub async fn recommended_songs(
    State(state): State<AppState>,
    QueryParams(page): QueryParams<PageParams>,
) -> ApiResult<Reply<Vec<Song>>> {
    let docs = state
        .store
        .find(collections::SONGS, &published_page(&page))
        .await
        .or_api("fetch recommended songs")?;
    Ok(Reply::ok(decode_all(docs, "songs")?, "Recommended songs fetched"))
}

#[derive(Debug, Default, Deserialize)]
pub struct RecommendationParams {
    #[serde(default)]
    pub based_on: Option<String>,
    #[serde(flatten)]
    pub page: PageParams,
}

/// Narrow a published-songs query by the `based_on` hint. Unknown hints
/// fall back to all published songs.
fn recommendation_query(params: &RecommendationParams) -> Query {
    let query = published_page(&params.page);
    match params
        .based_on
        .as_deref()
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("recently_played") => query.gt("plays", 0.0).sort_desc("plays"),
        Some("language_en") => query.eq("language", "en"),
        Some("genre_pop") => query.eq("genre", "Pop"),
        _ => query,
    }
}

/// GET /recommendations?based_on=
pub async fn recommendations(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<RecommendationParams>,
) -> ApiResult<Reply<Vec<Song>>> {
    let docs = state
        .store
        .find(collections::SONGS, &recommendation_query(&params))
        .await
        .or_api("fetch recommendations")?;
    Ok(Reply::ok(
        decode_all(docs, "songs")?,
        "Personalized recommendations fetched",
    ))
}
