//! # Pipeline Flows
//!
//! Drives the composed router in-process and checks what reached the store:
//!
//! 1. **Ordering**: limiter, resolver and role gate all run before a
//!    transaction scope is opened
//! 2. **Outcome**: only 2xx responses commit; every session ends once
//! 3. **Identity**: required routes stop at 401, optional routes continue
//! 4. **Health**: answered outside every decorator

#[cfg(test)]
mod tests {
    use crate::integration::support::{request, test_config, TestApp};
    use axum::http::{Method, StatusCode};
    use naevis_store::{Documents, Query, StoreBackend};
    use serde_json::json;
    use std::time::Duration;

    const API: &str = "/api/v1/musicon";

    fn url(path: &str) -> String {
        format!("{API}{path}")
    }

    // =========================================================================
    // ORDERING
    // =========================================================================

    #[tokio::test]
    async fn test_unauthenticated_write_never_opens_a_session() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                None,
                Some(json!({ "name": "Road trip" })),
            ))
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["data"], serde_json::Value::Null);
        assert!(app.store.events().is_empty());
        assert_eq!(app.store.memory().len("playlists"), 0);
    }

    #[tokio::test]
    async fn test_role_gate_runs_before_transaction() {
        let app = TestApp::new().await;
        let token = app.token("u1", &["user"]);

        let (status, _) = app
            .send(request(
                Method::POST,
                &url("/albums"),
                Some(&token),
                Some(json!({ "title": "Demo" })),
            ))
            .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(app.store.events().is_empty());
    }

    #[tokio::test]
    async fn test_limiter_runs_before_identity() {
        let mut config = test_config();
        config.rate_limit.write_burst_size = 1;
        config.rate_limit.writes_per_second = 1;
        let app = TestApp::with_config(config).await;

        let create = || {
            request(
                Method::POST,
                &url("/playlists"),
                None,
                Some(json!({ "name": "x" })),
            )
        };
        assert_eq!(app.send(create()).await.0, StatusCode::UNAUTHORIZED);

        let (status, body) = app.send(create()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["success"], false);
    }

    // =========================================================================
    // OUTCOME
    // =========================================================================

    #[tokio::test]
    async fn test_created_playlist_commits() {
        let app = TestApp::new().await;
        let token = app.token("u1", &["user"]);

        let (status, body) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&token),
                Some(json!({ "name": "Road trip", "description": "summer" })),
            ))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["userid"], "u1");
        assert!(body["data"]["playlistid"]
            .as_str()
            .is_some_and(|id| id.starts_with("pl_") && id.len() == 15));
        assert_eq!(app.store.kinds(), vec!["open", "start", "commit", "end"]);
        assert_eq!(app.store.memory().len("playlists"), 1);
        assert_eq!(app.store.memory().pool_status().open, 0);
    }

    #[tokio::test]
    async fn test_client_errors_abort() {
        let app = TestApp::new().await;
        let token = app.token("u1", &["user"]);

        // 400: name too long
        let (status, _) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&token),
                Some(json!({ "name": "n".repeat(101) })),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // 400: unknown field
        let (status, body) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&token),
                Some(json!({ "name": "ok", "owner": "someone" })),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid JSON input");

        // 404: delete of a missing playlist
        let (status, _) = app
            .send(request(
                Method::DELETE,
                &url("/playlists/pl_missing"),
                Some(&token),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let kinds = app.store.kinds();
        assert!(!kinds.contains(&"commit"));
        assert_eq!(kinds.iter().filter(|k| **k == "abort").count(), 3);
        assert_eq!(app.store.memory().len("playlists"), 0);
        for (session, ends) in app.store.ends_per_session() {
            assert_eq!(ends, 1, "session {session} ended {ends} times");
        }
    }

    #[tokio::test]
    async fn test_commit_failure_becomes_500() {
        let app = TestApp::new().await;
        let token = app.token("u1", &["user"]);
        app.store.fail_commits(true);

        let (status, body) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&token),
                Some(json!({ "name": "Doomed" })),
            ))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(
            app.store.kinds(),
            vec!["open", "start", "commit", "abort", "end"]
        );
        assert_eq!(app.store.memory().len("playlists"), 0);
        assert_eq!(app.client.open_scopes(), 0);
    }

    #[tokio::test]
    async fn test_ownership_is_enforced() {
        let app = TestApp::new().await;
        let owner = app.token("owner", &["user"]);
        let other = app.token("other", &["user"]);

        let (_, created) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&owner),
                Some(json!({ "name": "Mine" })),
            ))
            .await;
        let id = created["data"]["playlistid"].as_str().unwrap().to_string();
        app.store.clear();

        let (status, _) = app
            .send(request(
                Method::PATCH,
                &url(&format!("/playlists/{id}")),
                Some(&other),
                Some(json!({ "name": "Stolen" })),
            ))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .send(request(
                Method::DELETE,
                &url(&format!("/playlists/{id}")),
                Some(&other),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!app.store.kinds().contains(&"commit"));

        let (status, _) = app
            .send(request(
                Method::PATCH,
                &url(&format!("/playlists/{id}")),
                Some(&owner),
                Some(json!({ "name": "Still mine" })),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);

        let stored = app
            .store
            .memory()
            .find("playlists", &Query::new())
            .await
            .unwrap();
        assert_eq!(stored[0]["name"], "Still mine");
    }

    #[tokio::test]
    async fn test_playlist_songs_resolve_published_only() {
        let app = TestApp::new().await;
        app.seed_songs(&["s1", "s2"]);
        app.store
            .memory()
            .import(
                "songs",
                "songid",
                vec![json!({"songid": "s3", "artistid": "ar1", "title": "Draft", "published": false})],
            )
            .unwrap();
        let token = app.token("u1", &["user"]);

        let (_, created) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&token),
                Some(json!({ "name": "Mix" })),
            ))
            .await;
        let id = created["data"]["playlistid"].as_str().unwrap().to_string();
        for song in ["s1", "s3", "s1"] {
            let (status, _) = app
                .send(request(
                    Method::POST,
                    &url(&format!("/playlists/{id}/songs")),
                    Some(&token),
                    Some(json!({ "songid": song })),
                ))
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = app
            .send(request(
                Method::GET,
                &url(&format!("/playlists/{id}/songs")),
                None,
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        let songs = body["data"].as_array().unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0]["songid"], "s1");
    }

    #[tokio::test]
    async fn test_concurrent_song_adds_never_lose_a_committed_write() {
        let app = TestApp::new().await;
        app.seed_songs(&["s1", "s2"]);
        let token = app.token("u1", &["user"]);

        let (_, created) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&token),
                Some(json!({ "name": "Shared" })),
            ))
            .await;
        let id = created["data"]["playlistid"].as_str().unwrap().to_string();

        // Hold both commits open so each scope reads the playlist before
        // either one lands.
        app.store.delay_commits(Duration::from_millis(200));
        let add = |song: &str| {
            request(
                Method::POST,
                &url(&format!("/playlists/{id}/songs")),
                Some(&token),
                Some(json!({ "songid": song })),
            )
        };
        let ((first, _), (second, _)) = tokio::join!(app.send(add("s1")), app.send(add("s2")));
        app.store.delay_commits(Duration::ZERO);

        let mut statuses = [first, second];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR]);

        let stored = app.store.memory().get("playlists", &id).await.unwrap().unwrap();
        let songs = stored["songs"].as_array().unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(app.client.open_scopes(), 0);
    }

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let app = TestApp::new().await;
        app.seed_songs(&["s1"]);
        let token = app.token("u1", &["user"]);
        let like = |song: &str| request(Method::POST, &url(&format!("/user/liked/{song}")), Some(&token), None);

        assert_eq!(app.send(like("s1")).await.0, StatusCode::CREATED);
        let (status, body) = app.send(like("s1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Song already liked");
        assert_eq!(app.send(like("nope")).await.0, StatusCode::NOT_FOUND);
        assert_eq!(app.store.memory().len("likes"), 1);

        let (status, body) = app
            .send(request(Method::GET, &url("/user/liked"), Some(&token), None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["songid"], "s1");
    }

    // =========================================================================
    // IDENTITY
    // =========================================================================

    #[tokio::test]
    async fn test_optional_routes_continue_anonymously() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(request(Method::GET, &url("/albums"), None, None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));

        let (status, _) = app
            .send(request(Method::GET, &url("/albums"), Some("garbage"), None))
            .await;
        assert_eq!(status, StatusCode::OK);

        // Routes that need a user answer 401 themselves.
        let (status, _) = app
            .send(request(Method::GET, &url("/user/playlists"), None, None))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(app.store.events().is_empty());
    }

    #[tokio::test]
    async fn test_curator_can_create_album() {
        let app = TestApp::new().await;
        let admin = app.token("boss", &["admin"]);

        let (status, body) = app
            .send(request(
                Method::POST,
                &url("/albums"),
                Some(&admin),
                Some(json!({ "title": "Live", "published": true })),
            ))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["artistid"], "boss");
        assert_eq!(app.store.kinds(), vec!["open", "start", "commit", "end"]);

        let (_, listed) = app
            .send(request(Method::GET, &url("/albums"), None, None))
            .await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    }

    // =========================================================================
    // HEALTH
    // =========================================================================

    #[tokio::test]
    async fn test_health_bypasses_limiter_and_store() {
        let mut config = test_config();
        config.rate_limit.burst_size = 1;
        config.rate_limit.requests_per_second = 1;
        let app = TestApp::with_config(config).await;

        let albums = || request(Method::GET, &url("/albums"), None, None);
        assert_eq!(app.send(albums()).await.0, StatusCode::OK);
        assert_eq!(app.send(albums()).await.0, StatusCode::TOO_MANY_REQUESTS);

        for _ in 0..5 {
            let (status, body) = app.send(request(Method::GET, "/health", None, None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "status": "healthy" }));
        }

        app.client.close().await;
        assert_eq!(
            app.send(request(Method::GET, "/health", None, None)).await.0,
            StatusCode::OK
        );
        assert_eq!(
            app.send(request(Method::GET, "/health/store", None, None)).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_closed_store_rejects_writes() {
        let app = TestApp::new().await;
        let token = app.token("u1", &["user"]);
        app.client.close().await;

        let (status, body) = app
            .send(request(
                Method::POST,
                &url("/playlists"),
                Some(&token),
                Some(json!({ "name": "Late" })),
            ))
            .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert!(app.store.events().is_empty());
    }
}
