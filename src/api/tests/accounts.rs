use super::*;

#[tokio::test]
async fn create_account_returns_created() {
    let (app, _hub, _temp_dir) = test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/accounts",
            None,
            json!({ "name": "alice", "password": "secret" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["name"], "alice");
    assert!(body["id"].as_i64().unwrap() > 0);
    assert!(body.get("password").is_none());
}

#[tokio::test]
async fn duplicate_account_is_conflict() {
    let (app, _hub, _temp_dir) = test_app().await;
    let credentials = json!({ "name": "alice", "password": "secret" });

    let first = app
        .clone()
        .oneshot(json_request("POST", "/accounts", None, credentials.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(json_request("POST", "/accounts", None, credentials))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["error"]["code"], "already_exists");
}

#[tokio::test]
async fn blank_account_name_is_bad_request() {
    let (app, _hub, _temp_dir) = test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/accounts",
            None,
            json!({ "name": "   ", "password": "secret" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_argument");
}

#[tokio::test]
async fn session_returns_token_and_sets_cookie() {
    let (app, hub, _temp_dir) = test_app().await;
    let credentials = json!({ "name": "alice", "password": "secret" });

    app.clone()
        .oneshot(json_request("POST", "/accounts", None, credentials.clone()))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request("POST", "/sessions", None, credentials))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = body_json(response).await;
    let token = body["token"].as_str().unwrap();

    assert!(cookie.starts_with(&format!("dlhub_session={token};")));
    assert!(cookie.contains("HttpOnly"));
    assert_eq!(body["account"]["name"], "alice");

    let task = hub
        .tasks()
        .create_download_task(token, "https://example.com/", crate::types::DownloadType::Http)
        .await
        .unwrap();
    assert_eq!(
        task.owner_account_id.get(),
        body["account"]["id"].as_i64().unwrap()
    );
}

#[tokio::test]
async fn wrong_password_is_unauthorized_and_clears_cookie() {
    let (app, _hub, _temp_dir) = test_app().await;

    app.clone()
        .oneshot(json_request(
            "POST",
            "/accounts",
            None,
            json!({ "name": "alice", "password": "secret" }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/sessions",
            None,
            json!({ "name": "alice", "password": "guess" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cookie = response.headers().get(header::SET_COOKIE).unwrap();
    assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn session_for_unknown_account_is_not_found() {
    let (app, _hub, _temp_dir) = test_app().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/sessions",
            None,
            json!({ "name": "nobody", "password": "secret" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "not_found");
}
