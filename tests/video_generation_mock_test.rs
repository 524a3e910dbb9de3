//! Mock API tests for the video generation flow and the quality
//! degradation ladder.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jimeng_client::config::{DeviceFingerprint, PollConfig};
use jimeng_client::{ClientConfig, JimengClient, JimengError, VideoOptions};

fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({ "ret": "0", "errmsg": "", "data": data })
}

fn fast_client(server: &MockServer) -> JimengClient {
    let config = ClientConfig::builder()
        .base_url(server.uri())
        .fingerprint(DeviceFingerprint::fixed(7_100, 7_200, "test-user"))
        .retry_delay_unit(Duration::from_millis(2))
        .video_poll(PollConfig {
            budget: 8,
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(3),
        })
        .build();
    JimengClient::with_config(config, "test-token").unwrap()
}

async fn mount_credit(server: &MockServer, gift: i64) {
    Mock::given(method("POST"))
        .and(path("/commerce/v1/benefits/user_credit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "credit": {
                "gift_credit": gift,
                "purchase_credit": 0,
                "vip_credit": 0
            }
        }))))
        .mount(server)
        .await;
}

#[tokio::test]
async fn video_job_polls_until_a_play_url_appears() {
    let mock_server = MockServer::start().await;
    mount_credit(&mock_server, 10).await;

    Mock::given(method("POST"))
        .and(path("/mweb/v1/aigc_draft/generate"))
        .and(body_partial_json(json!({
            "extend": {
                "root_model": "dreamina_ic_generate_video_model_vgfm_3.0"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "aigc_data": { "history_record_id": "h-700" }
        }))))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mweb/v1/get_history_by_ids"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "h-700": { "status": 20, "item_list": [] }
        }))))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mweb/v1/get_history_by_ids"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "h-700": {
                "status": 50,
                "item_list": [{
                    "video": { "play_url": "https://cdn.example/clip.mp4" }
                }]
            }
        }))))
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server);
    let url = client
        .generate_video(
            "jimeng-video-3.0",
            "waves rolling onto a beach",
            VideoOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(url, "https://cdn.example/clip.mp4");
}

#[tokio::test]
async fn raw_scan_recovers_an_embedded_result_url() {
    let mock_server = MockServer::start().await;
    mount_credit(&mock_server, 10).await;

    Mock::given(method("POST"))
        .and(path("/mweb/v1/aigc_draft/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "aigc_data": { "history_record_id": "h-710" }
        }))))
        .mount(&mock_server)
        .await;
    // Status still says processing, but the payload already embeds a
    // final media URL.
    Mock::given(method("POST"))
        .and(path("/mweb/v1/get_history_by_ids"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "h-710": {
                "status": 20,
                "item_list": [],
                "draft_debug": "https://v9-artist.vlabvod.com/abc123/out.mp4"
            }
        }))))
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server);
    let url = client
        .generate_video("jimeng-video-3.0", "a drifting balloon", VideoOptions::default())
        .await
        .unwrap();
    assert_eq!(url, "https://v9-artist.vlabvod.com/abc123/out.mp4");
}

#[tokio::test]
async fn video_failure_code_maps_to_generation_failed() {
    let mock_server = MockServer::start().await;
    mount_credit(&mock_server, 10).await;

    Mock::given(method("POST"))
        .and(path("/mweb/v1/aigc_draft/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "aigc_data": { "history_record_id": "h-720" }
        }))))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mweb/v1/get_history_by_ids"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "h-720": { "status": 30, "fail_code": "1234", "item_list": [] }
        }))))
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server);
    let err = client
        .generate_video("jimeng-video-3.0", "a storm", VideoOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, JimengError::GenerationFailed(_)));
}

#[tokio::test]
async fn degradation_walks_the_whole_quality_ladder() {
    let mock_server = MockServer::start().await;
    mount_credit(&mock_server, 10).await;

    // Every submission is rejected for credits: six rungs from
    // (1080p, 10s) down to (480p, 5s), then a terminal error.
    Mock::given(method("POST"))
        .and(path("/mweb/v1/aigc_draft/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ret": "5000",
            "errmsg": "积分不足",
            "data": null
        })))
        .expect(6)
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server);
    let options = VideoOptions {
        resolution: "1080p".to_string(),
        ..VideoOptions::default()
    };
    let err = client
        .generate_video_with_retry("jimeng-video-3.0", "an expensive epic", options)
        .await
        .unwrap_err();
    assert!(err.is_insufficient_balance());
}

#[tokio::test]
async fn degradation_stops_on_the_first_affordable_rung() {
    let mock_server = MockServer::start().await;
    mount_credit(&mock_server, 10).await;

    // First rung rejected, second accepted.
    Mock::given(method("POST"))
        .and(path("/mweb/v1/aigc_draft/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ret": "5000",
            "errmsg": "积分不足",
            "data": null
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mweb/v1/aigc_draft/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "aigc_data": { "history_record_id": "h-730" }
        }))))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mweb/v1/get_history_by_ids"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "h-730": {
                "status": 50,
                "item_list": [{
                    "video": { "download_url": "https://cdn.example/cheaper.mp4" }
                }]
            }
        }))))
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server);
    let url = client
        .generate_video_with_retry(
            "jimeng-video-3.0",
            "a modest clip",
            VideoOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(url, "https://cdn.example/cheaper.mp4");
}
