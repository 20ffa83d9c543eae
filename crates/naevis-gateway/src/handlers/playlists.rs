//! Playlist routes.
//!
//! Mutations match on `{playlistid, userid}`; a playlist owned by someone
//! else is indistinguishable from a missing one.

use super::respond::{decode, decode_all, encode, JsonBody, Reply, StoreResultExt};
use super::songs::published_songs;
use super::AppState;
use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::{Caller, Transaction};
use crate::domain::types::{
    generate_id, valid_playlist_name, AddSong, CreatePlaylist, Playlist, Song, UpdatePlaylist,
};
use axum::extract::{Path, State};
use chrono::Utc;
use naevis_store::{collections, Documents, Query, TransactionHandle};
use serde_json::{json, Value};
use tracing::info;

const NAME_RULE: &str = "Playlist name must be 1-100 characters";
const NOT_OWNED: &str = "Playlist not found or unauthorized";

/// GET /user/playlists
pub async fn user_playlists(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Reply<Vec<Playlist>>> {
    let query = Query::new().eq("userid", caller.user_id.as_str());
    let docs = state
        .store
        .find(collections::PLAYLISTS, &query)
        .await
        .or_api("fetch playlists")?;
    let playlists = decode_all(docs, "playlists")?;
    Ok(Reply::ok(playlists, "Playlists fetched successfully"))
}

/// POST /playlists
pub async fn create_playlist(
    Caller(caller): Caller,
    Transaction(tx): Transaction,
    JsonBody(body): JsonBody<CreatePlaylist>,
) -> ApiResult<Reply<Playlist>> {
    if !valid_playlist_name(&body.name) {
        return Err(ApiError::bad_request(NAME_RULE));
    }

    let now = Utc::now();
    let playlist = Playlist {
        playlistid: generate_id("pl_"),
        userid: caller.user_id.clone(),
        name: body.name,
        description: body.description,
        cover_url: None,
        songs: Vec::new(),
        created_at: now,
        updated_at: now,
        duration: 0,
        is_compilation: false,
        copyrights: None,
    };

    tx.insert(collections::PLAYLISTS, &playlist.playlistid, encode(&playlist)?)
        .await
        .or_api("create playlist")?;

    info!(playlist_id = %playlist.playlistid, user_id = %caller.user_id, "Playlist created");
    Ok(Reply::created(playlist, "Playlist created successfully"))
}

/// DELETE /playlists/:playlistid
pub async fn delete_playlist(
    Caller(caller): Caller,
    Transaction(tx): Transaction,
    Path(playlist_id): Path<String>,
) -> ApiResult<Reply<Value>> {
    if owned_playlist(&tx, &playlist_id, &caller.user_id).await?.is_none() {
        return Err(ApiError::not_found(NOT_OWNED));
    }
    tx.delete(collections::PLAYLISTS, &playlist_id)
        .await
        .or_api("delete playlist")?;
    Ok(Reply::ok(
        json!({ "playlist_id": playlist_id }),
        "Playlist deleted successfully",
    ))
}

/// PATCH /playlists/:playlistid
pub async fn update_playlist(
    Caller(caller): Caller,
    Transaction(tx): Transaction,
    Path(playlist_id): Path<String>,
    JsonBody(body): JsonBody<UpdatePlaylist>,
) -> ApiResult<Reply<Value>> {
    if !valid_playlist_name(&body.name) {
        return Err(ApiError::bad_request(NAME_RULE));
    }
    let mut playlist = owned_playlist(&tx, &playlist_id, &caller.user_id)
        .await?
        .ok_or_else(|| ApiError::forbidden(NOT_OWNED))?;

    playlist.name = body.name;
    playlist.description = body.description;
    playlist.cover_url = body.cover_url;
    save(&tx, playlist).await?;

    Ok(Reply::ok(
        json!({ "playlist_id": playlist_id }),
        "Playlist updated successfully",
    ))
}

/// POST /playlists/:playlistid/songs
pub async fn add_song(
    Caller(caller): Caller,
    Transaction(tx): Transaction,
    Path(playlist_id): Path<String>,
    JsonBody(body): JsonBody<AddSong>,
) -> ApiResult<Reply<Value>> {
    if body.songid.is_empty() {
        return Err(ApiError::bad_request("songid is required"));
    }
    let mut playlist = owned_playlist(&tx, &playlist_id, &caller.user_id)
        .await?
        .ok_or_else(|| ApiError::forbidden(NOT_OWNED))?;

    if !playlist.songs.contains(&body.songid) {
        playlist.songs.push(body.songid.clone());
    }
    save(&tx, playlist).await?;

    Ok(Reply::ok(
        json!({ "playlist_id": playlist_id, "song_id": body.songid }),
        "Song added to playlist",
    ))
}

/// DELETE /playlists/:playlistid/songs/:songid
pub async fn remove_song(
    Caller(caller): Caller,
    Transaction(tx): Transaction,
    Path((playlist_id, song_id)): Path<(String, String)>,
) -> ApiResult<Reply<Value>> {
    let mut playlist = owned_playlist(&tx, &playlist_id, &caller.user_id)
        .await?
        .ok_or_else(|| ApiError::forbidden(NOT_OWNED))?;

    playlist.songs.retain(|s| s != &song_id);
    save(&tx, playlist).await?;

    Ok(Reply::ok(
        json!({ "playlist_id": playlist_id, "song_id": song_id }),
        "Song removed from playlist",
    ))
}

/// GET /playlists/:playlistid/songs
pub async fn playlist_songs(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> ApiResult<Reply<Vec<Song>>> {
    let doc = state
        .store
        .get(collections::PLAYLISTS, &playlist_id)
        .await
        .or_api("fetch playlist")?;
    let Some(doc) = doc else {
        return Ok(Reply::ok(Vec::new(), "Playlist not found"));
    };
    let playlist: Playlist = decode(doc, "playlist")?;
    let songs = published_songs(&state, playlist.songs).await?;
    Ok(Reply::ok(
        songs,
        format!("Songs for playlist {playlist_id} fetched"),
    ))
}

async fn owned_playlist(
    tx: &TransactionHandle,
    playlist_id: &str,
    user_id: &str,
) -> ApiResult<Option<Playlist>> {
    let doc = tx
        .get(collections::PLAYLISTS, playlist_id)
        .await
        .or_api("fetch playlist")?;
    let Some(doc) = doc else {
        return Ok(None);
    };
    let playlist: Playlist = decode(doc, "playlist")?;
    Ok((playlist.userid == user_id).then_some(playlist))
}

async fn save(tx: &TransactionHandle, mut playlist: Playlist) -> ApiResult<()> {
    playlist.updated_at = Utc::now();
    let matched = tx
        .replace(collections::PLAYLISTS, &playlist.playlistid, encode(&playlist)?)
        .await
        .or_api("update playlist")?;
    if !matched {
        return Err(ApiError::forbidden(NOT_OWNED));
    }
    Ok(())
}
