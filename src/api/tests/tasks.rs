use super::*;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn create_task(app: &Router, token: &str, url: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/download-tasks",
            Some(token),
            json!({ "url": url }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let (app, _hub, _temp_dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/download-tasks", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::SET_COOKIE));

    let response = app
        .oneshot(empty_request("GET", "/download-tasks", Some("forged.token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "unauthenticated");
}

#[tokio::test]
async fn create_defaults_to_http_and_pending() {
    let (app, hub, _temp_dir) = test_app().await;
    let token = sign_in(&app, "alice").await;

    let task = create_task(&app, &token, "https://example.com/file.iso").await;

    assert_eq!(task["status"], "pending");
    assert_eq!(task["download_type"], "http");
    assert_eq!(task["url"], "https://example.com/file.iso");
    assert_eq!(hub.queue_lag().await.unwrap(), 1);
}

#[tokio::test]
async fn create_with_invalid_url_is_bad_request() {
    let (app, _hub, _temp_dir) = test_app().await;
    let token = sign_in(&app, "alice").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/download-tasks",
            Some(&token),
            json!({ "url": "mailto:someone@example.com" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_cookie_authenticates() {
    let (app, _hub, _temp_dir) = test_app().await;
    let token = sign_in(&app, "alice").await;

    let request = Request::builder()
        .uri("/download-tasks")
        .header(header::COOKIE, format!("dlhub_session={token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn list_pages_with_total() {
    let (app, _hub, _temp_dir) = test_app().await;
    let token = sign_in(&app, "alice").await;
    for i in 0..3 {
        create_task(&app, &token, &format!("https://example.com/{i}")).await;
    }

    let response = app
        .oneshot(empty_request(
            "GET",
            "/download-tasks?limit=2&offset=1",
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let page = body_json(response).await;
    assert_eq!(page["total"], 3);
    let tasks = page["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["url"], "https://example.com/1");
}

#[tokio::test]
async fn get_update_and_delete() {
    let (app, _hub, _temp_dir) = test_app().await;
    let token = sign_in(&app, "alice").await;
    let id = create_task(&app, &token, "https://example.com/a").await["id"]
        .as_i64()
        .unwrap();
    let uri = format!("/download-tasks/{id}");

    let response = app
        .clone()
        .oneshot(empty_request("GET", &uri, Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], id);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &uri,
            Some(&token),
            json!({ "url": "https://example.com/b" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["url"], "https://example.com/b");

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &uri, Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(empty_request("GET", &uri, Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "download_task_not_found");
    assert_eq!(body["error"]["details"]["task_id"], id);
}

#[tokio::test]
async fn other_accounts_get_not_found() {
    let (app, _hub, _temp_dir) = test_app().await;
    let alice = sign_in(&app, "alice").await;
    let bob = sign_in(&app, "bob").await;
    let id = create_task(&app, &alice, "https://example.com/a").await["id"]
        .as_i64()
        .unwrap();

    let response = app
        .oneshot(empty_request(
            "DELETE",
            &format!("/download-tasks/{id}"),
            Some(&bob),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn file_of_pending_task_is_conflict() {
    let (app, _hub, _temp_dir) = test_app().await;
    let token = sign_in(&app, "alice").await;
    let id = create_task(&app, &token, "https://example.com/a").await["id"]
        .as_i64()
        .unwrap();

    let response = app
        .oneshot(empty_request(
            "GET",
            &format!("/download-tasks/{id}/file"),
            Some(&token),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_state");
    assert_eq!(body["error"]["details"]["current_state"], "pending");
}

#[tokio::test]
async fn file_streams_stored_content() {
    let (app, hub, _temp_dir) = test_app().await;
    let token = sign_in(&app, "alice").await;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"k":1}"#, "application/json"))
        .mount(&server)
        .await;

    let task = create_task(&app, &token, &format!("{}/data.json", server.uri())).await;
    let id = task["id"].as_i64().unwrap();
    hub.tasks()
        .execute_download_task(crate::types::DownloadTaskId(id), &CancellationToken::new())
        .await
        .unwrap();

    let response = app
        .oneshot(empty_request(
            "GET",
            &format!("/download-tasks/{id}/file"),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(headers[header::CONTENT_LENGTH], "7");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"download_file_{id}\"")
    );
    assert_eq!(body_bytes(response).await, br#"{"k":1}"#);
}
