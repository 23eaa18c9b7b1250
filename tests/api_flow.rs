// tests/api_flow.rs
// End-to-end HTTP flows over in-memory backends: reads are cached, writes
// invalidate, side effects land on the queue.

mod common;

use actix_web::{http::StatusCode, test, App};
use serde_json::{json, Value};

use zanly::api::configure;
use zanly::db::{MaterialStatus, MaterialStore, NewMaterial, NewUser, Role, UserStore};
use zanly::policy::OnUnavailable;
use zanly::queue::{EmailJob, EmailType, Job, JobQueue};
use zanly::security::rate_limiter::{RateLimiter, RateLimiterConfig};

const STUDENT: (&str, &str) = ("x-user-id", "2");
const ADMIN_ID: (&str, &str) = ("x-user-id", "1");
const ADMIN_ROLE: (&str, &str) = ("x-user-role", "ADMIN");

fn material(title: &str) -> NewMaterial {
    NewMaterial {
        title: title.to_string(),
        description: Some(format!("{} notes", title)),
        class: "10".to_string(),
        subject: "Physics".to_string(),
        kind: "Notes".to_string(),
        file_url: format!("https://files.example.com/{}.pdf", title.to_lowercase()),
        uploaded_by_id: None,
    }
}

async fn seed_users(h: &common::Harness) {
    h.store
        .create_user(NewUser {
            name: "Admin".into(),
            email: "admin@example.com".into(),
            role: Some(Role::Admin),
            image: None,
        })
        .await
        .unwrap();
    h.store
        .create_user(NewUser {
            name: "Student".into(),
            email: "student@example.com".into(),
            role: None,
            image: None,
        })
        .await
        .unwrap();
}

async fn approved(h: &common::Harness, title: &str) -> i64 {
    let m = h.store.create_material(material(title)).await.unwrap();
    h.store
        .set_material_status(m.id, MaterialStatus::Approved)
        .await
        .unwrap();
    m.id
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(App::new().app_data($h.state.clone()).configure(configure)).await
    };
}

macro_rules! listing_total {
    ($app:expr) => {{
        let req = test::TestRequest::get()
            .uri("/api/v1/user/materials")
            .insert_header(STUDENT)
            .to_request();
        let body: Value = test::call_and_read_body_json(&$app, req).await;
        body["total"].as_u64().unwrap()
    }};
}

#[actix_web::test]
async fn test_listing_is_cached_until_a_write_invalidates_it() {
    let h = common::harness();
    seed_users(&h).await;
    approved(&h, "Optics").await;
    let app = app!(h);

    assert_eq!(listing_total!(app), 1);

    // Written behind the API's back: the cached page is still served.
    approved(&h, "Motion").await;
    assert_eq!(listing_total!(app), 1);

    // An upload goes through the coordinator and drops every listing page.
    let req = test::TestRequest::post()
        .uri("/api/v1/user/upload")
        .insert_header(STUDENT)
        .set_json(json!({
            "title": "Waves",
            "class": "10",
            "subject": "Physics",
            "type": "Notes",
            "fileUrl": "https://files.example.com/waves.pdf"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["material"]["status"], "PENDING");
    assert_eq!(body["material"]["uploadedById"], 2);
    let uploaded = body["material"]["id"].as_i64().unwrap();

    // Pending uploads are not listed.
    assert_eq!(listing_total!(app), 2);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/admin/material/{}/approve", uploaded))
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    assert_eq!(listing_total!(app), 3);
}

#[actix_web::test]
async fn test_cache_clear_leaves_rate_limits_and_jobs_alone() {
    let h = common::harness();
    seed_users(&h).await;
    approved(&h, "Optics").await;
    let app = app!(h);

    let limiter = RateLimiter::new(
        RateLimiterConfig {
            enabled: true,
            window: std::time::Duration::from_secs(900),
            max_requests: 1,
            on_unavailable: OnUnavailable::FailClosed,
        },
        h.cache.clone(),
    );
    let now = 1_700_000_000_000;
    assert!(limiter.check_at("203.0.113.5", now).await.unwrap().allowed);
    assert!(!limiter.check_at("203.0.113.5", now).await.unwrap().allowed);

    let job_id = h
        .queue
        .enqueue(Job::SendEmail(EmailJob {
            to: "student@example.com".into(),
            name: "Student".into(),
            email_type: EmailType::Welcome,
            otp: None,
        }))
        .await
        .unwrap();

    assert_eq!(listing_total!(app), 1);
    approved(&h, "Waves").await;
    // Still served from the cache.
    assert_eq!(listing_total!(app), 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/clear/cache")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(listing_total!(app), 2);
    assert!(!limiter.check_at("203.0.113.5", now).await.unwrap().allowed);
    assert!(h.queue.get(&job_id).await.unwrap().is_some());
    assert_eq!(h.queue.stats().await.unwrap().waiting, 1);
}

#[actix_web::test]
async fn test_upload_requires_fields() {
    let h = common::harness();
    seed_users(&h).await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/v1/user/upload")
        .insert_header(STUDENT)
        .set_json(json!({
            "title": " ",
            "class": "10",
            "subject": "Physics",
            "type": "Notes",
            "fileUrl": "x"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "fail");
}

#[actix_web::test]
async fn test_search_and_filter_validation() {
    let h = common::harness();
    seed_users(&h).await;
    approved(&h, "Optics").await;
    let app = app!(h);

    let req = test::TestRequest::get()
        .uri("/api/v1/user/search?q=%20")
        .insert_header(STUDENT)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/v1/user/filter?class=all")
        .insert_header(STUDENT)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/v1/user/search?q=optics")
        .insert_header(STUDENT)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["materials"][0]["title"], "Optics");
}

#[actix_web::test]
async fn test_bookmarks_cache_and_invalidate_per_user() {
    let h = common::harness();
    seed_users(&h).await;
    let optics = approved(&h, "Optics").await;
    let motion = approved(&h, "Motion").await;
    let app = app!(h);

    let get = || {
        test::TestRequest::get()
            .uri("/api/v1/bookmark/get")
            .insert_header(STUDENT)
            .to_request()
    };

    // Nothing yet: 404, and the empty list is not cached.
    assert_eq!(test::call_service(&app, get()).await.status(), StatusCode::NOT_FOUND);

    let add = |id: i64| {
        test::TestRequest::post()
            .uri("/api/v1/bookmark/add")
            .insert_header(STUDENT)
            .set_json(json!({ "materialId": id }))
            .to_request()
    };
    assert_eq!(test::call_service(&app, add(optics)).await.status(), StatusCode::CREATED);

    let body: Value = test::call_and_read_body_json(&app, get()).await;
    assert_eq!(body["source"], "db");
    assert_eq!(body["bookmarks"].as_array().unwrap().len(), 1);

    let body: Value = test::call_and_read_body_json(&app, get()).await;
    assert_eq!(body["source"], "cache");

    assert_eq!(test::call_service(&app, add(motion)).await.status(), StatusCode::CREATED);
    assert_eq!(test::call_service(&app, add(motion)).await.status(), StatusCode::CONFLICT);
    assert_eq!(test::call_service(&app, add(9_999)).await.status(), StatusCode::NOT_FOUND);

    let body: Value = test::call_and_read_body_json(&app, get()).await;
    assert_eq!(body["source"], "db");
    assert_eq!(body["bookmarks"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/bookmark/{}", optics))
        .insert_header(STUDENT)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let body: Value = test::call_and_read_body_json(&app, get()).await;
    assert_eq!(body["bookmarks"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/bookmark/{}", optics))
        .insert_header(STUDENT)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_identity_headers_gate_routes() {
    let h = common::harness();
    seed_users(&h).await;
    let app = app!(h);

    let req = test::TestRequest::get().uri("/api/v1/user/materials").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/users")
        .insert_header(STUDENT)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/users")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 2);
}

#[actix_web::test]
async fn test_role_change_refreshes_cached_user() {
    let h = common::harness();
    seed_users(&h).await;
    let app = app!(h);

    let get_user = || {
        test::TestRequest::get()
            .uri("/api/v1/admin/user/2")
            .insert_header(ADMIN_ID)
            .insert_header(ADMIN_ROLE)
            .to_request()
    };
    let body: Value = test::call_and_read_body_json(&app, get_user()).await;
    assert_eq!(body["user"]["role"], "USER");

    let req = test::TestRequest::patch()
        .uri("/api/v1/admin/user/2/role")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .set_json(json!({ "role": "ADMIN" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let body: Value = test::call_and_read_body_json(&app, get_user()).await;
    assert_eq!(body["user"]["role"], "ADMIN");

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/user/77")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_user_create_queues_welcome_email() {
    let h = common::harness();
    seed_users(&h).await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/user")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .set_json(json!({ "name": "Ada", "email": "ada@example.com" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.waiting, 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/jobs/stats")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["queue"], "memory");
    assert_eq!(body["stats"]["waiting"], 1);
}

#[actix_web::test]
async fn test_email_job_rejects_bad_payload() {
    let h = common::harness();
    seed_users(&h).await;
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/jobs/email")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .set_json(json!({ "to": "ada@example.com", "name": "Ada", "emailType": "RESET PASSWORD" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/jobs/email")
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .set_json(json!({ "to": "ada@example.com", "name": "Ada", "emailType": "Login" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: Value = test::read_body_json(resp).await;
    let id = body["jobId"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/admin/jobs/{}", id))
        .insert_header(ADMIN_ID)
        .insert_header(ADMIN_ROLE)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "queued");
}

#[actix_web::test]
async fn test_zanly_ai_answers_and_caches() {
    let h = common::harness();
    seed_users(&h).await;
    approved(&h, "Optics").await;
    let app = app!(h);

    let ask = |prompt: &str| {
        test::TestRequest::post()
            .uri("/api/v1/zanlyai")
            .insert_header(STUDENT)
            .set_json(json!({ "prompt": prompt }))
            .to_request()
    };

    assert_eq!(test::call_service(&app, ask("   ")).await.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::call_and_read_body_json(&app, ask("Any optics notes?")).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["source"], "generated");
    assert_eq!(body["reply"], "Try the Class 10 physics notes.");

    let body: Value = test::call_and_read_body_json(&app, ask("Any optics notes?")).await;
    assert_eq!(body["source"], "cache");
    assert_eq!(h.model.calls(), 1);

    // The approved material grounded the prompt.
    let requests = h.model.requests.lock();
    assert!(requests[0].system.contains("Title: Optics"));
}

#[actix_web::test]
async fn test_health_reflects_readiness() {
    let h = common::harness();
    let app = app!(h);

    let req = test::TestRequest::get().uri("/health").to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    h.state.health.mark_ready();
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["database"], "healthy");
}
