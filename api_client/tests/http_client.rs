use api_client::{
    ApiClient, ApiClientError, ChangeFeed, ChangeOp, FeedFilter, NewMediaRow, ObjectStore,
    RowStore, TransferPayload, MEDIA_TABLE,
};
use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;

fn client(server: &MockServer) -> ApiClient {
    let mut client = ApiClient::new(server.base_url(), "anon".into());
    client.set_access_token("token".into());
    client
}

#[tokio::test]
async fn test_fetch_event_sends_auth_headers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/events")
                .query_param("id", "eq.e1")
                .header("apikey", "anon")
                .header("authorization", "Bearer token");
            then.status(200).json_body(json!([
                {"id": "e1", "name": "Wedding", "created_by": "u1", "creator_display_name": "Alice"}
            ]));
        })
        .await;

    let event = client(&server).fetch_event("e1").await.unwrap();
    assert_eq!(event.creator_display_name.as_deref(), Some("Alice"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_event_missing_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/events");
            then.status(200).json_body(json!([]));
        })
        .await;

    let err = client(&server).fetch_event("nope").await.unwrap_err();
    assert!(matches!(err, ApiClientError::NotFound(_)));
}

#[tokio::test]
async fn test_list_media_filters_and_orders() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/media")
                .query_param("event_id", "eq.e1")
                .query_param("type", "eq.photo")
                .query_param("order", "created_at.desc");
            then.status(200).json_body(json!([
                {"id": "m2", "event_id": "e1", "user_id": "u1", "url": "https://x/2.jpg", "type": "photo", "created_at": "2024-05-02T00:00:00Z"},
                {"id": "m1", "event_id": "e1", "user_id": "u2", "url": "https://x/1.jpg", "type": "photo", "created_at": "2024-05-01T00:00:00Z"}
            ]));
        })
        .await;

    let rows = client(&server).list_media("e1", "photo").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, "m2");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_list_likes_empty_ids_skips_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/likes");
            then.status(200).json_body(json!([]));
        })
        .await;

    let likes = client(&server).list_likes(&[]).await.unwrap();
    assert!(likes.is_empty());
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_list_likes_uses_in_filter() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/likes")
                .query_param("media_id", "in.(m1,m2)");
            then.status(200)
                .json_body(json!([{"media_id": "m1", "user_id": "u9"}]));
        })
        .await;

    let likes = client(&server)
        .list_likes(&["m1".to_string(), "m2".to_string()])
        .await
        .unwrap();
    assert_eq!(likes.len(), 1);
}

#[tokio::test]
async fn test_status_mapping() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/likes");
            then.status(403).body("denied");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/rest/v1/likes");
            then.status(503).body("busy");
        })
        .await;

    let c = client(&server);
    let err = c.insert_like("m1", "u1").await.unwrap_err();
    assert!(matches!(err, ApiClientError::PermissionDenied(_)));
    let err = c.delete_like("m1", "u1").await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_insert_media_returns_row() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/media")
                .header("prefer", "return=representation")
                .json_body(json!({"event_id": "e1", "user_id": "u1", "url": "https://x/a.jpg", "type": "photo"}));
            then.status(201).json_body(json!([
                {"id": "m9", "event_id": "e1", "user_id": "u1", "url": "https://x/a.jpg", "type": "photo", "created_at": "2024-05-03T00:00:00Z"}
            ]));
        })
        .await;

    let row = client(&server)
        .insert_media(&NewMediaRow::photo("e1", "u1", "https://x/a.jpg"))
        .await
        .unwrap();
    assert_eq!(row.id, "m9");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_delete_media_blocked_by_policy_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/rest/v1/media").query_param("id", "eq.m1");
            then.status(200).json_body(json!([]));
        })
        .await;

    let err = client(&server).delete_media("m1").await.unwrap_err();
    assert!(matches!(err, ApiClientError::NotFound(_)));
}

#[tokio::test]
async fn test_lookup_display_name_rpc() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/rpc/get_user_display_name")
                .json_body(json!({"user_id": "u7"}));
            then.status(200).json_body(json!("Grace"));
        })
        .await;

    let name = client(&server).lookup_display_name("u7").await.unwrap();
    assert_eq!(name.as_deref(), Some("Grace"));
}

#[tokio::test]
async fn test_upload_decodes_payload_and_upserts() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/storage/v1/object/event-photos/e1/u1_1_0.jpg")
                .header("x-upsert", "true")
                .header("content-type", "image/jpeg")
                .body("jpegbytes");
            then.status(200).json_body(json!({"Key": "event-photos/e1/u1_1_0.jpg"}));
        })
        .await;

    let c = client(&server);
    let payload = TransferPayload::encode(b"jpegbytes", "image/jpeg");
    c.upload("e1/u1_1_0.jpg", &payload, true).await.unwrap();
    mock.assert_async().await;

    let url = c.public_url("e1/u1_1_0.jpg");
    assert_eq!(
        url,
        format!("{}/storage/v1/object/public/event-photos/e1/u1_1_0.jpg", server.base_url())
    );
    assert_eq!(c.path_from_public_url(&url).as_deref(), Some("e1/u1_1_0.jpg"));
}

#[tokio::test]
async fn test_remove_sends_prefixes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/storage/v1/object/event-photos")
                .json_body(json!({"prefixes": ["e1/a.jpg"]}));
            then.status(200).json_body(json!([]));
        })
        .await;

    client(&server)
        .remove(&["e1/a.jpg".to_string()])
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_subscribe_parses_event_stream() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/realtime/v1/sse")
                .query_param("table", "media")
                .query_param("filter", "event_id=eq.e1");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(": hello\n\ndata: {\"table\":\"media\",\"type\":\"INSERT\"}\n\ndata: not json\n\n");
        })
        .await;

    let mut sub = client(&server)
        .subscribe(FeedFilter::table(MEDIA_TABLE).eq("event_id", "e1"))
        .await
        .unwrap();
    let ev = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ev.operation, ChangeOp::Insert);
    // body ends, so the stream closes after the malformed line is skipped
    let end = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap();
    assert!(end.is_none());
}
