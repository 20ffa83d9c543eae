//! Liked songs.

use super::respond::{decode_all, encode, Reply, StoreResultExt};
use super::songs::published_songs;
use super::AppState;
use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::{Caller, Transaction};
use crate::domain::types::{Like, Song};
use axum::extract::{Path, State};
use chrono::Utc;
use naevis_store::{collections, Documents, Query};
use serde_json::{json, Value};

/// GET /user/liked, most recent first.
pub async fn user_likes(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Reply<Vec<Song>>> {
    let query = Query::new()
        .eq("userid", caller.user_id.as_str())
        .sort_desc("likedAt");
    let docs = state
        .store
        .find(collections::LIKES, &query)
        .await
        .or_api("fetch likes")?;
    let likes: Vec<Like> = decode_all(docs, "likes")?;
    let ids = likes.into_iter().map(|l| l.songid).collect();
    let songs = published_songs(&state, ids).await?;
    Ok(Reply::ok(songs, "Likes fetched successfully"))
}

/// POST /user/liked/:songid. Liking twice is a no-op.
pub async fn like_song(
    Caller(caller): Caller,
    Transaction(tx): Transaction,
    Path(song_id): Path<String>,
) -> ApiResult<Reply<Value>> {
    let song = tx
        .get(collections::SONGS, &song_id)
        .await
        .or_api("fetch song")?;
    if song.is_none() {
        return Err(ApiError::not_found("Song not found"));
    }

    let key = Like::key(&caller.user_id, &song_id);
    let data = json!({ "song_id": song_id });
    if tx.get(collections::LIKES, &key).await.or_api("fetch like")?.is_some() {
        return Ok(Reply::ok(data, "Song already liked"));
    }

    let like = Like {
        userid: caller.user_id.clone(),
        songid: song_id,
        liked_at: Utc::now(),
    };
    tx.insert(collections::LIKES, &key, encode(&like)?)
        .await
        .or_api("like song")?;
    Ok(Reply::created(data, "Song liked"))
}
