//! Album routes.

use super::respond::{decode, decode_all, encode, JsonBody, Reply, StoreResultExt};
use super::songs::published_songs;
use super::AppState;
use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::{Caller, Transaction};
use crate::domain::types::{generate_id, Album, CreateAlbum, PageParams, Song};
use axum::extract::{Path, Query as QueryParams, State};
use naevis_store::{collections, Documents, Query};
use tracing::info;

const MAX_TITLE: usize = 200;

/// GET /albums
pub async fn list_albums(State(state): State<AppState>) -> ApiResult<Reply<Vec<Album>>> {
    let docs = state
        .store
        .find(collections::ALBUMS, &Query::new().eq("published", true))
        .await
        .or_api("fetch albums")?;
    Ok(Reply::ok(decode_all(docs, "albums")?, "Albums fetched successfully"))
}

/// GET /albums/:albumid/songs
pub async fn album_songs(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
) -> ApiResult<Reply<Vec<Song>>> {
    let doc = state
        .store
        .get(collections::ALBUMS, &album_id)
        .await
        .or_api("fetch album")?;
    let Some(doc) = doc else {
        return Ok(Reply::ok(Vec::new(), "No songs found for album"));
    };
    let album: Album = decode(doc, "album")?;
    let songs = published_songs(&state, album.songs).await?;
    Ok(Reply::ok(songs, format!("Songs for album {album_id} fetched")))
}

/// GET /recommended/albums
pub async fn recommended_albums(
    State(state): State<AppState>,
    QueryParams(page): QueryParams<PageParams>,
) -> ApiResult<Reply<Vec<Album>>> {
    let query = Query::new()
        .eq("published", true)
        .skip(page.skip())
        .limit(page.limit());
    let docs = state
        .store
        .find(collections::ALBUMS, &query)
        .await
        .or_api("fetch recommended albums")?;
    Ok(Reply::ok(decode_all(docs, "albums")?, "Recommended albums fetched"))
}

/// POST /albums (admin or artist). The caller becomes the album's artist.
pub async fn create_album(
    Caller(caller): Caller,
    Transaction(tx): Transaction,
    JsonBody(body): JsonBody<CreateAlbum>,
) -> ApiResult<Reply<Album>> {
    let title_len = body.title.trim().chars().count();
    if title_len == 0 || title_len > MAX_TITLE {
        return Err(ApiError::bad_request("Album title must be 1-200 characters"));
    }

    let album = Album {
        albumid: generate_id("al_"),
        artistid: caller.user_id.clone(),
        title: body.title,
        description: body.description,
        release_date: body.release_date,
        published: body.published,
        songs: body.songs,
        cover_url: body.cover_url,
    };

    tx.insert(collections::ALBUMS, &album.albumid, encode(&album)?)
        .await
        .or_api("create album")?;

    info!(album_id = %album.albumid, artist_id = %caller.user_id, "Album created");
    Ok(Reply::created(album, "Album created successfully"))
}
